//! Deterministic study-advice text for a student's score history.
//!
//! Produces the markdown shown on the student dashboard when no
//! external text-generation service is wired up: overall grade band,
//! distance to the passing line, delta against the previous
//! administration, and strongest/weakest sections.

use crate::stats::{self, ScoreRecord, SectionScores};
use crate::testconfig::PassRule;

fn grade_band(ratio: f64) -> (&'static str, &'static str) {
    if ratio >= 80.0 {
        ("優秀", "素晴らしい成績です。この調子で継続してください。")
    } else if ratio >= 70.0 {
        ("良好", "良い成績を維持しています。さらなる向上を目指しましょう。")
    } else if ratio >= 60.0 {
        ("合格ライン", "合格ラインをクリアしています。安定した成績を保ちましょう。")
    } else if ratio >= 50.0 {
        ("要努力", "合格まであと一歩です。弱点分野を重点的に学習しましょう。")
    } else {
        ("基礎強化必要", "基礎からしっかりと復習し、段階的にレベルアップしましょう。")
    }
}

/// Advice for the latest record, with `previous` as the administration
/// before it. Records are expected newest-first, as the score listing
/// returns them.
pub fn generate(student_name: &str, records: &[ScoreRecord]) -> Option<String> {
    let latest = records.first()?;
    let previous = records.get(1);
    let config = latest.config();
    let total = latest.effective_total();

    let mut out = String::new();
    out.push_str(&format!("{}さんの学習アドバイス\n\n", student_name));

    // 1. Overall band on the percentage scale of this record's variant.
    let ratio = if config.total_questions > 0.0 {
        100.0 * total / config.total_questions
    } else {
        0.0
    };
    let (band, band_comment) = grade_band(ratio);
    out.push_str(&format!("## 総合評価: {}\n{}\n\n", band, band_comment));

    // 2. Distance to the passing line, under the record's own rule.
    match config.pass_rule {
        PassRule::TotalAtLeast(passing) => {
            if total >= passing {
                out.push_str(&format!(
                    "## 合格ライン達成\n合格ライン（{}点）を{}点上回っています。この成果を維持し、さらなる高得点を目指しましょう。\n\n",
                    passing,
                    total - passing
                ));
            } else {
                let gap = passing - total;
                out.push_str(&format!("## 合格まで: あと{}点\n", gap));
                if gap <= 10.0 {
                    out.push_str("あと少しで合格ラインです。集中的な復習で十分到達可能です。\n\n");
                } else if gap <= 20.0 {
                    out.push_str("計画的な学習で合格ラインに近づけます。弱点分野を中心に学習しましょう。\n\n");
                } else {
                    out.push_str("基礎力向上が必要です。各分野をバランスよく学習し、着実にステップアップしましょう。\n\n");
                }
            }
        }
        PassRule::PartTotals { ad_min, bc_min } => {
            let (ad, bc) = match &latest.sections {
                SectionScores::Parts(p) => (p.ad(), p.bc()),
                SectionScores::Subjects(_) => (0.0, 0.0),
            };
            if ad >= ad_min && bc >= bc_min {
                out.push_str("## 合格ライン達成\nA・D問題、B・C問題とも基準点を上回っています。\n\n");
            } else {
                out.push_str("## 合格基準との比較\n");
                if ad < ad_min {
                    out.push_str(&format!("A・D問題合計: あと{}点必要です。\n", ad_min - ad));
                }
                if bc < bc_min {
                    out.push_str(&format!("B・C問題合計: あと{}点必要です。\n", bc_min - bc));
                }
                out.push('\n');
            }
        }
    }

    // 3. Delta against the previous administration, when one exists.
    if let Some(prev) = previous {
        let diff = total - prev.effective_total();
        out.push_str("## 前回との比較\n");
        if diff > 0.0 {
            out.push_str(&format!("前回より{}点向上しています。この調子で継続しましょう。\n\n", diff));
        } else if diff < 0.0 {
            out.push_str(&format!(
                "前回より{}点下降しています。復習を強化し、次回は向上を目指しましょう。\n\n",
                -diff
            ));
        } else {
            out.push_str("前回と同じ点数です。安定していますが、さらなる向上を目指しましょう。\n\n");
        }
    }

    // 4. Strongest and weakest sections of the latest record.
    let mut sections: Vec<(&str, f64)> = config
        .sections
        .iter()
        .map(|def| (def.label, latest.sections.get(def.key).unwrap_or(0.0)))
        .collect();
    sections.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let strong: Vec<String> = sections
        .iter()
        .take(3)
        .map(|(name, score)| format!("{}（{}点）", name, score))
        .collect();
    let weak: Vec<String> = sections
        .iter()
        .rev()
        .take(3)
        .map(|(name, score)| format!("{}（{}点）", name, score))
        .collect();
    out.push_str("## 分野別分析\n");
    out.push_str(&format!("得意分野: {}\n", strong.join("、")));
    out.push_str(&format!("重点強化分野: {}\n\n", weak.join("、")));

    // 5. Study guidance keyed on whether the latest record passes.
    out.push_str("## 学習アドバイス\n");
    if stats::is_passing(latest) {
        out.push_str("1. 現在の学習方法を継続し、さらなる向上を目指しましょう。\n");
        out.push_str("2. より難易度の高い問題にも取り組みましょう。\n");
        out.push_str("3. すべての分野で安定した高得点を目指しましょう。\n");
    } else {
        let weakest = sections.last().map(|(name, _)| *name).unwrap_or("弱点分野");
        out.push_str(&format!("1. {}を基礎から応用まで段階的に復習しましょう。\n", weakest));
        out.push_str("2. 弱点分野の過去問を重点的に解きましょう。\n");
        out.push_str("3. 間違えた問題は必ず解説を読み、理解を深めましょう。\n");
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{PartScores, SectionScores, SubjectScores};
    use crate::testconfig::TestType;

    fn q100(student_id: &str, test_date: &str, scores: [f64; 8]) -> ScoreRecord {
        let sections = SectionScores::Subjects(SubjectScores {
            kanri: scores[0],
            kaibou: scores[1],
            gakkou: scores[2],
            rikou: scores[3],
            yushou: scores[4],
            shikan: scores[5],
            kyousei: scores[6],
            shouni: scores[7],
        });
        ScoreRecord {
            id: format!("{}-{}", student_id, test_date),
            student_id: student_id.to_string(),
            name: "前原 謙太".to_string(),
            test_name: "模擬試験".to_string(),
            test_date: test_date.to_string(),
            test_type: TestType::Q100,
            stored_total: sections.sum(),
            sections,
            created_at: None,
        }
    }

    #[test]
    fn empty_history_yields_nothing() {
        assert!(generate("前原 謙太", &[]).is_none());
    }

    #[test]
    fn failing_record_reports_gap_and_weak_sections() {
        // Total 55: five points short of the 100q line.
        let records = vec![q100("221017", "2025-08-05", [5.0, 8.0, 5.0, 10.0, 12.0, 9.0, 4.0, 2.0])];
        let text = generate("前原 謙太", &records).expect("advice");
        assert!(text.contains("総合評価: 要努力"));
        assert!(text.contains("合格まで: あと5点"));
        assert!(text.contains("重点強化分野"));
        // Weakest section drives the first study item.
        assert!(text.contains("小児"));
    }

    #[test]
    fn passing_record_reports_margin() {
        let records = vec![q100("221017", "2025-08-05", [8.0, 11.0, 8.0, 14.0, 16.0, 16.0, 8.0, 8.0])];
        let text = generate("前原 謙太", &records).expect("advice");
        // Total 89.
        assert!(text.contains("総合評価: 優秀"));
        assert!(text.contains("合格ライン達成"));
        assert!(text.contains("29点上回っています"));
    }

    #[test]
    fn previous_record_comparison_is_included() {
        let records = vec![
            q100("221017", "2025-09-01", [8.0, 10.0, 8.0, 13.0, 15.0, 14.0, 7.0, 7.0]),
            q100("221017", "2025-08-05", [5.0, 8.0, 5.0, 10.0, 12.0, 9.0, 4.0, 2.0]),
        ];
        let text = generate("前原 謙太", &records).expect("advice");
        // 82 vs 55.
        assert!(text.contains("前回より27点向上"));
    }

    #[test]
    fn legacy_record_uses_two_part_comparison() {
        let sections = SectionScores::Parts(PartScores { a: 60.0, b: 20.0, c: 20.0, d: 60.0 });
        let record = ScoreRecord {
            id: "r1".to_string(),
            student_id: "221017".to_string(),
            name: "前原 謙太".to_string(),
            test_name: "旧形式模試".to_string(),
            test_date: "2025-08-05".to_string(),
            test_type: TestType::Legacy400,
            stored_total: sections.sum(),
            sections,
            created_at: None,
        };
        let text = generate("前原 謙太", &[record]).expect("advice");
        // A+D = 120, twelve short of 132; B+C = 40, four short of 44.
        assert!(text.contains("A・D問題合計: あと12点"));
        assert!(text.contains("B・C問題合計: あと4点"));
    }
}
