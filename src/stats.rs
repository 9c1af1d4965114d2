//! Score analytics over in-memory cohorts: averages, competition
//! ranking, deviation scores, and pass judgment. Everything here is
//! pure; callers load the cohort rows and pass slices in.

use serde::Serialize;
use std::cmp::Ordering;

use crate::testconfig::{self, PassRule, TestConfig, TestType};

/// One-decimal display rounding applied by presentation code.
/// The analytics functions themselves never round.
pub fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// The eight subject scores of the current exam layout.
/// Missing values are normalized to zero at the load boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SubjectScores {
    pub kanri: f64,
    pub kaibou: f64,
    pub gakkou: f64,
    pub rikou: f64,
    pub yushou: f64,
    pub shikan: f64,
    pub kyousei: f64,
    pub shouni: f64,
}

impl SubjectScores {
    pub fn get(&self, key: &str) -> Option<f64> {
        match key {
            "section_kanri" => Some(self.kanri),
            "section_kaibou" => Some(self.kaibou),
            "section_gakkou" => Some(self.gakkou),
            "section_rikou" => Some(self.rikou),
            "section_yushou" => Some(self.yushou),
            "section_shikan" => Some(self.shikan),
            "section_kyousei" => Some(self.kyousei),
            "section_shouni" => Some(self.shouni),
            _ => None,
        }
    }

    pub fn sum(&self) -> f64 {
        self.kanri
            + self.kaibou
            + self.gakkou
            + self.rikou
            + self.yushou
            + self.shikan
            + self.kyousei
            + self.shouni
    }
}

/// The legacy four-part A/B/C/D scores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PartScores {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl PartScores {
    pub fn ad(&self) -> f64 {
        self.a + self.d
    }

    pub fn bc(&self) -> f64 {
        self.b + self.c
    }

    pub fn sum(&self) -> f64 {
        self.a + self.b + self.c + self.d
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        match key {
            "part_a" => Some(self.a),
            "part_b" => Some(self.b),
            "part_c" => Some(self.c),
            "part_d" => Some(self.d),
            _ => None,
        }
    }
}

/// Section layout of a record, fixed by its test type. The two layouts
/// are distinct score models and never read through each other.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SectionScores {
    Subjects(SubjectScores),
    Parts(PartScores),
}

impl SectionScores {
    pub fn sum(&self) -> f64 {
        match self {
            SectionScores::Subjects(s) => s.sum(),
            SectionScores::Parts(p) => p.sum(),
        }
    }

    /// Value for one configured section key; `None` when the key does
    /// not belong to this layout.
    pub fn get(&self, key: &str) -> Option<f64> {
        match self {
            SectionScores::Subjects(s) => s.get(key),
            SectionScores::Parts(p) => p.get(key),
        }
    }
}

/// One student's result on one test administration.
#[derive(Debug, Clone)]
pub struct ScoreRecord {
    pub id: String,
    pub student_id: String,
    pub name: String,
    pub test_name: String,
    pub test_date: String,
    pub test_type: TestType,
    pub sections: SectionScores,
    /// Total as supplied at ingestion. Kept for mismatch reporting;
    /// analytics use `effective_total`.
    pub stored_total: f64,
    pub created_at: Option<String>,
}

impl ScoreRecord {
    pub fn config(&self) -> &'static TestConfig {
        testconfig::config_for(self.test_type)
    }

    /// Total recomputed from the record's own section scores.
    pub fn effective_total(&self) -> f64 {
        self.sections.sum()
    }

    pub fn total_mismatch(&self) -> bool {
        (self.stored_total - self.effective_total()).abs() > 1e-9
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionAverage {
    pub key: &'static str,
    pub label: &'static str,
    pub average: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortAverages {
    pub student_count: usize,
    pub total_average: f64,
    pub sections: Vec<SectionAverage>,
}

/// Arithmetic means across a cohort, per configured section and for
/// the recomputed total. `None` for an empty cohort; callers render
/// "no data" instead of a zero-filled row.
pub fn aggregate(cohort: &[ScoreRecord]) -> Option<CohortAverages> {
    let first = cohort.first()?;
    let n = cohort.len() as f64;

    let sections = first
        .config()
        .sections
        .iter()
        .map(|def| SectionAverage {
            key: def.key,
            label: def.label,
            average: cohort
                .iter()
                .map(|r| r.sections.get(def.key).unwrap_or(0.0))
                .sum::<f64>()
                / n,
        })
        .collect();

    let total_average = cohort.iter().map(|r| r.effective_total()).sum::<f64>() / n;

    Some(CohortAverages {
        student_count: cohort.len(),
        total_average,
        sections,
    })
}

#[derive(Debug, Clone)]
pub struct RankedScore {
    pub record: ScoreRecord,
    pub key: f64,
    pub rank: i64,
}

/// Competition ranking: sort descending by key, ties share a rank, the
/// next distinct key takes its 1-based position. Equal keys are
/// ordered by student id for deterministic output; the secondary order
/// never changes the rank numbers.
pub fn rank_cohort<F>(cohort: &[ScoreRecord], key: F) -> Vec<RankedScore>
where
    F: Fn(&ScoreRecord) -> f64,
{
    let mut rows: Vec<RankedScore> = cohort
        .iter()
        .map(|r| RankedScore {
            record: r.clone(),
            key: key(r),
            rank: 0,
        })
        .collect();

    rows.sort_by(|a, b| {
        b.key
            .partial_cmp(&a.key)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.record.student_id.cmp(&b.record.student_id))
    });

    let ranks = competition_ranks(&rows.iter().map(|r| r.key).collect::<Vec<_>>());
    for (row, rank) in rows.iter_mut().zip(ranks) {
        row.rank = rank;
    }

    rows
}

/// Rank numbers for keys already sorted in descending order: ties
/// share a rank, the next distinct key takes its 1-based position.
pub fn competition_ranks(sorted_keys: &[f64]) -> Vec<i64> {
    let mut ranks = Vec::with_capacity(sorted_keys.len());
    let mut last_key = f64::NAN;
    let mut last_rank = 0i64;
    for (idx, key) in sorted_keys.iter().enumerate() {
        if *key != last_key {
            last_rank = idx as i64 + 1;
            last_key = *key;
        }
        ranks.push(last_rank);
    }
    ranks
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / (values.len() as f64)
}

/// Population standard deviation (divide by N, not N-1).
pub fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (values.len() as f64);
    variance.sqrt()
}

/// Deviation scores (mean 50, spread 10) for a list of totals, aligned
/// by index. A zero standard deviation substitutes 1 as the divisor so
/// an all-identical cohort collapses to exactly 50 rather than
/// dividing by zero.
pub fn deviation_from_totals(totals: &[f64]) -> Vec<f64> {
    if totals.is_empty() {
        return Vec::new();
    }
    let m = mean(totals);
    let sd = population_std_dev(totals);
    let divisor = if sd == 0.0 { 1.0 } else { sd };
    totals
        .iter()
        .map(|x| 50.0 + (x - m) * 10.0 / divisor)
        .collect()
}

/// Deviation scores for a cohort, keyed by recomputed totals, aligned
/// with the input order.
pub fn deviation_scores(cohort: &[ScoreRecord]) -> Vec<f64> {
    let totals: Vec<f64> = cohort.iter().map(|r| r.effective_total()).collect();
    deviation_from_totals(&totals)
}

/// Display bucket for a deviation score. Presentation only; the
/// underlying value stays unclamped.
pub fn deviation_band(dev: f64) -> &'static str {
    if dev >= 70.0 {
        "70+"
    } else if dev >= 60.0 {
        "60-69"
    } else if dev >= 50.0 {
        "50-59"
    } else if dev >= 40.0 {
        "40-49"
    } else {
        "under40"
    }
}

/// Pass judgment against the record's own test-type configuration.
/// A two-part-rule record whose layout is missing the parts reads them
/// as zero and fails.
pub fn is_passing(record: &ScoreRecord) -> bool {
    match (&record.config().pass_rule, &record.sections) {
        (PassRule::TotalAtLeast(min), _) => record.effective_total() >= *min,
        (PassRule::PartTotals { ad_min, bc_min }, SectionScores::Parts(p)) => {
            p.ad() >= *ad_min && p.bc() >= *bc_min
        }
        (PassRule::PartTotals { .. }, SectionScores::Subjects(_)) => false,
    }
}
