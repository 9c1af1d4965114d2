//! CSV parsing and template text for roster and score imports.
//!
//! The admin tooling produces simple comma-separated files (no quoted
//! fields), optionally with a UTF-8 BOM. Rows that cannot be used are
//! skipped and reported; a bad row never aborts the whole import.

use std::path::Path;

use crate::stats::SubjectScores;

pub const UTF8_BOM: &str = "\u{feff}";

/// Columns of a score row, in file order after the header:
/// 学生ID, 氏名, テスト名, テスト日付, 総得点, then the eight subject
/// scores, then 満点.
pub const SCORE_HEADERS: [&str; 14] = [
    "学生ID",
    "氏名",
    "テスト名",
    "テスト日付",
    "総得点",
    "管理",
    "解剖",
    "顎口",
    "理工",
    "有床",
    "歯冠",
    "矯正",
    "小児",
    "満点",
];

pub const ROSTER_HEADERS: [&str; 4] = ["学生ID", "氏名", "メールアドレス", "パスワード"];

pub fn strip_bom(text: &str) -> &str {
    text.strip_prefix(UTF8_BOM).unwrap_or(text)
}

pub fn read_csv_file(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    Ok(strip_bom(&text).to_string())
}

#[derive(Debug, Clone)]
pub struct ScoreCsvRow {
    /// 1-based line number in the file, for error reporting.
    pub line_no: usize,
    pub student_id: String,
    pub name: String,
    pub total_score: f64,
    pub sections: SubjectScores,
    pub max_score: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RosterCsvRow {
    pub line_no: usize,
    pub student_id: String,
    pub name: String,
    pub email: Option<String>,
    pub password: Option<String>,
}

fn fields(line: &str) -> Vec<String> {
    line.split(',').map(|f| f.trim().to_string()).collect()
}

fn num(fields: &[String], idx: usize) -> f64 {
    fields
        .get(idx)
        .and_then(|f| f.parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn opt(fields: &[String], idx: usize) -> Option<String> {
    fields.get(idx).filter(|f| !f.is_empty()).cloned()
}

/// Parse score rows. The first non-empty line is the header and is
/// skipped. The test-name and test-date columns are positional only:
/// the import request parameters name the administration, so those
/// two columns are not read. Returns the usable rows and one message
/// per skipped row.
pub fn parse_score_rows(text: &str) -> (Vec<ScoreCsvRow>, Vec<String>) {
    let mut rows = Vec::new();
    let mut errors = Vec::new();
    let mut seen_header = false;

    for (idx, raw) in strip_bom(text).lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if !seen_header {
            seen_header = true;
            continue;
        }

        let line_no = idx + 1;
        let f = fields(line);
        if f.len() < 5 {
            errors.push(format!(
                "row {}: expected at least 5 columns, found {}",
                line_no,
                f.len()
            ));
            continue;
        }

        let student_id = f[0].clone();
        let name = f[1].clone();
        if student_id.is_empty() || name.is_empty() {
            errors.push(format!("row {}: missing student id or name", line_no));
            continue;
        }

        rows.push(ScoreCsvRow {
            line_no,
            student_id,
            name,
            total_score: num(&f, 4),
            sections: SubjectScores {
                kanri: num(&f, 5),
                kaibou: num(&f, 6),
                gakkou: num(&f, 7),
                rikou: num(&f, 8),
                yushou: num(&f, 9),
                shikan: num(&f, 10),
                kyousei: num(&f, 11),
                shouni: num(&f, 12),
            },
            max_score: f.get(13).and_then(|v| v.parse::<f64>().ok()),
        });
    }

    (rows, errors)
}

/// Parse roster rows: 学生ID, 氏名, メールアドレス, パスワード.
pub fn parse_roster_rows(text: &str) -> (Vec<RosterCsvRow>, Vec<String>) {
    let mut rows = Vec::new();
    let mut errors = Vec::new();
    let mut seen_header = false;

    for (idx, raw) in strip_bom(text).lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if !seen_header {
            seen_header = true;
            continue;
        }

        let line_no = idx + 1;
        let f = fields(line);
        if f.len() < 2 {
            errors.push(format!(
                "row {}: expected at least 2 columns, found {}",
                line_no,
                f.len()
            ));
            continue;
        }
        if f[0].is_empty() || f[1].is_empty() {
            errors.push(format!("row {}: missing student id or name", line_no));
            continue;
        }

        rows.push(RosterCsvRow {
            line_no,
            student_id: f[0].clone(),
            name: f[1].clone(),
            email: opt(&f, 2),
            password: opt(&f, 3),
        });
    }

    (rows, errors)
}

pub struct CsvTemplate {
    pub filename: &'static str,
    pub content: String,
}

const LEGACY_HEADERS: [&str; 10] = [
    "学生ID",
    "氏名",
    "テスト名",
    "テスト日付",
    "総得点",
    "A問題",
    "B問題",
    "C問題",
    "D問題",
    "満点",
];

const STUDENT_SAMPLES: [&str; 2] = [
    "221017,前原 謙太,maehara@example.com,password123",
    "231001,足立 晴仁,adachi@example.com,password456",
];

const SCORE_SAMPLES: [&str; 2] = [
    "221017,前原 謙太,第1回模擬試験,2025-08-05,75,7,9,7,12,14,13,7,6,100",
    "231001,足立 晴仁,第1回模擬試験,2025-08-05,68,6,8,6,11,13,12,6,6,100",
];

const LEGACY_SAMPLES: [&str; 2] = [
    "221017,前原 謙太,第1回模擬試験,2025-08-05,350,80,90,85,95,400",
    "231001,足立 晴仁,第1回模擬試験,2025-08-05,320,75,85,80,80,400",
];

/// Import templates handed to admins, BOM-prefixed so spreadsheet
/// tools keep the Japanese headers intact.
pub fn template(kind: &str) -> Option<CsvTemplate> {
    let filename: &'static str;
    let headers: &[&str];
    let samples: &[&str];
    match kind {
        "students" => {
            filename = "学生データテンプレート.csv";
            headers = &ROSTER_HEADERS;
            samples = &STUDENT_SAMPLES;
        }
        "testResults" => {
            filename = "テスト結果テンプレート.csv";
            headers = &SCORE_HEADERS;
            samples = &SCORE_SAMPLES;
        }
        "testResultsLegacy" => {
            filename = "テスト結果テンプレート_旧構造.csv";
            headers = &LEGACY_HEADERS;
            samples = &LEGACY_SAMPLES;
        }
        _ => return None,
    }

    let mut lines = Vec::with_capacity(samples.len() + 1);
    lines.push(headers.join(","));
    lines.extend(samples.iter().map(|s| s.to_string()));
    Some(CsvTemplate {
        filename,
        content: format!("{}{}", UTF8_BOM, lines.join("\n")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_utf8_bom() {
        let text = format!("{}学生ID,氏名\n1,a", UTF8_BOM);
        assert!(strip_bom(&text).starts_with("学生ID"));
        assert_eq!(strip_bom("plain"), "plain");
    }

    #[test]
    fn parses_score_rows_and_skips_header() {
        let text = "学生ID,氏名,テスト名,テスト日付,総得点,管理,解剖,顎口,理工,有床,歯冠,矯正,小児,満点\n\
                    221017,前原 謙太,第1回模擬試験,2025-08-05,75,7,9,7,12,14,13,7,6,100\n";
        let (rows, errors) = parse_score_rows(text);
        assert!(errors.is_empty());
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.student_id, "221017");
        assert_eq!(row.name, "前原 謙太");
        assert_eq!(row.total_score, 75.0);
        assert_eq!(row.sections.kanri, 7.0);
        assert_eq!(row.sections.shouni, 6.0);
        assert_eq!(row.sections.sum(), 75.0);
        assert_eq!(row.max_score, Some(100.0));
    }

    #[test]
    fn short_and_incomplete_rows_are_reported_not_fatal() {
        let text = "header\n221017,前原 謙太,t,2025-08-05,75\nonly,three,cols\n,no-id,t,d,10\n";
        let (rows, errors) = parse_score_rows(text);
        assert_eq!(rows.len(), 1);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("row 3"));
        assert!(errors[1].contains("row 4"));
    }

    #[test]
    fn unparseable_numbers_read_as_zero() {
        let text = "h\n221017,名前,t,2025-08-05,abc,x,,3\n";
        let (rows, errors) = parse_score_rows(text);
        assert!(errors.is_empty());
        assert_eq!(rows[0].total_score, 0.0);
        assert_eq!(rows[0].sections.kanri, 0.0);
        assert_eq!(rows[0].sections.kaibou, 0.0);
        assert_eq!(rows[0].sections.gakkou, 3.0);
    }

    #[test]
    fn parses_roster_rows() {
        let text = format!(
            "{}学生ID,氏名,メールアドレス,パスワード\n221017,前原 謙太,m@example.com,pw\n231001,足立 晴仁,,\n",
            UTF8_BOM
        );
        let (rows, errors) = parse_roster_rows(&text);
        assert!(errors.is_empty());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].email.as_deref(), Some("m@example.com"));
        assert!(rows[1].email.is_none());
        assert!(rows[1].password.is_none());
    }

    #[test]
    fn templates_carry_bom_and_headers() {
        for kind in ["students", "testResults", "testResultsLegacy"] {
            let t = template(kind).expect(kind);
            assert!(t.content.starts_with(UTF8_BOM), "{}", kind);
            assert!(t.content.contains("学生ID"), "{}", kind);
        }
        assert!(template("unknown").is_none());
        let t = template("testResults").unwrap();
        assert!(t.content.contains("管理"));
    }
}
