//! Static test configuration: the single source of truth for question
//! counts, per-section maxima, and pass rules, keyed by test type.

/// The configuration variant a score record was graded under.
///
/// `Q100` and `Q80` share the eight-subject layout and differ only in
/// question counts; `Legacy400` is the old four-part A/B/C/D layout
/// with its own two-part pass rule. The variants are not
/// interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestType {
    Q100,
    Q80,
    Legacy400,
}

impl TestType {
    pub fn parse(s: &str) -> Option<TestType> {
        match s {
            "100q" => Some(TestType::Q100),
            "80q" => Some(TestType::Q80),
            "legacy400" => Some(TestType::Legacy400),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TestType::Q100 => "100q",
            TestType::Q80 => "80q",
            TestType::Legacy400 => "legacy400",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SectionDef {
    /// Stable key, also the database column name.
    pub key: &'static str,
    /// Display label (subject name as printed on the exam).
    pub label: &'static str,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PassRule {
    /// Total score at or above the threshold passes. The threshold is
    /// 60% of the variant's question count.
    TotalAtLeast(f64),
    /// Legacy two-part rule: A+D and B+C must each clear their minimum.
    PartTotals { ad_min: f64, bc_min: f64 },
}

#[derive(Debug, Clone, Copy)]
pub struct TestConfig {
    pub test_type: TestType,
    pub total_questions: f64,
    pub sections: &'static [SectionDef],
    pub pass_rule: PassRule,
}

impl TestConfig {
    /// The single passing threshold, where the rule has one.
    pub fn passing_score(&self) -> Option<f64> {
        match self.pass_rule {
            PassRule::TotalAtLeast(min) => Some(min),
            PassRule::PartTotals { .. } => None,
        }
    }

    pub fn section(&self, key: &str) -> Option<&'static SectionDef> {
        self.sections.iter().find(|s| s.key == key)
    }
}

const SECTIONS_100Q: [SectionDef; 8] = [
    SectionDef { key: "section_kanri", label: "管理", max: 9.0 },
    SectionDef { key: "section_kaibou", label: "解剖", max: 12.0 },
    SectionDef { key: "section_gakkou", label: "顎口", max: 9.0 },
    SectionDef { key: "section_rikou", label: "理工", max: 16.0 },
    SectionDef { key: "section_yushou", label: "有床", max: 18.0 },
    SectionDef { key: "section_shikan", label: "歯冠", max: 18.0 },
    SectionDef { key: "section_kyousei", label: "矯正", max: 9.0 },
    SectionDef { key: "section_shouni", label: "小児", max: 9.0 },
];

const SECTIONS_80Q: [SectionDef; 8] = [
    SectionDef { key: "section_kanri", label: "管理", max: 3.0 },
    SectionDef { key: "section_kaibou", label: "解剖", max: 10.0 },
    SectionDef { key: "section_gakkou", label: "顎口", max: 5.0 },
    SectionDef { key: "section_rikou", label: "理工", max: 14.0 },
    SectionDef { key: "section_yushou", label: "有床", max: 20.0 },
    SectionDef { key: "section_shikan", label: "歯冠", max: 18.0 },
    SectionDef { key: "section_kyousei", label: "矯正", max: 5.0 },
    SectionDef { key: "section_shouni", label: "小児", max: 5.0 },
];

const SECTIONS_LEGACY: [SectionDef; 4] = [
    SectionDef { key: "part_a", label: "A問題", max: 100.0 },
    SectionDef { key: "part_b", label: "B問題", max: 100.0 },
    SectionDef { key: "part_c", label: "C問題", max: 100.0 },
    SectionDef { key: "part_d", label: "D問題", max: 100.0 },
];

const CONFIG_100Q: TestConfig = TestConfig {
    test_type: TestType::Q100,
    total_questions: 100.0,
    sections: &SECTIONS_100Q,
    pass_rule: PassRule::TotalAtLeast(60.0),
};

const CONFIG_80Q: TestConfig = TestConfig {
    test_type: TestType::Q80,
    total_questions: 80.0,
    sections: &SECTIONS_80Q,
    pass_rule: PassRule::TotalAtLeast(48.0),
};

const CONFIG_LEGACY: TestConfig = TestConfig {
    test_type: TestType::Legacy400,
    total_questions: 400.0,
    sections: &SECTIONS_LEGACY,
    pass_rule: PassRule::PartTotals { ad_min: 132.0, bc_min: 44.0 },
};

pub fn config_for(test_type: TestType) -> &'static TestConfig {
    match test_type {
        TestType::Q100 => &CONFIG_100Q,
        TestType::Q80 => &CONFIG_80Q,
        TestType::Legacy400 => &CONFIG_LEGACY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_known_types() {
        for t in [TestType::Q100, TestType::Q80, TestType::Legacy400] {
            assert_eq!(TestType::parse(t.as_str()), Some(t));
        }
    }

    #[test]
    fn parse_rejects_unknown_types() {
        assert_eq!(TestType::parse("200q"), None);
        assert_eq!(TestType::parse(""), None);
        assert_eq!(TestType::parse("100Q"), None);
    }

    #[test]
    fn subject_section_maxima_sum_to_question_count() {
        for t in [TestType::Q100, TestType::Q80] {
            let cfg = config_for(t);
            let sum: f64 = cfg.sections.iter().map(|s| s.max).sum();
            assert_eq!(sum, cfg.total_questions, "{}", t.as_str());
        }
    }

    #[test]
    fn passing_score_is_sixty_percent_of_total() {
        assert_eq!(config_for(TestType::Q100).passing_score(), Some(60.0));
        assert_eq!(config_for(TestType::Q80).passing_score(), Some(48.0));
        for t in [TestType::Q100, TestType::Q80] {
            let cfg = config_for(t);
            assert_eq!(cfg.passing_score(), Some(cfg.total_questions * 0.6));
        }
    }

    #[test]
    fn legacy_variant_uses_two_part_rule() {
        let cfg = config_for(TestType::Legacy400);
        assert_eq!(cfg.passing_score(), None);
        assert_eq!(
            cfg.pass_rule,
            PassRule::PartTotals { ad_min: 132.0, bc_min: 44.0 }
        );
        assert_eq!(cfg.sections.len(), 4);
    }
}
