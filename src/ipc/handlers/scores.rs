use crate::csv;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, load_err, opt_str, required_str, required_test_date, required_test_type,
};
use crate::ipc::types::{AppState, Request};
use crate::stats::{self, PartScores, ScoreRecord, SectionScores, SubjectScores};
use crate::testconfig::{TestConfig, TestType};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

/// Invariant checks on one incoming record: section maxima and the
/// stored-total/section-sum agreement. Violations are warnings; the
/// record is still stored as supplied.
fn validation_warnings(
    prefix: &str,
    config: &TestConfig,
    sections: &SectionScores,
    total_score: f64,
) -> Vec<String> {
    let mut warnings = Vec::new();
    for def in config.sections {
        let value = sections.get(def.key).unwrap_or(0.0);
        if value < 0.0 {
            warnings.push(format!("{}: {} is negative ({})", prefix, def.label, value));
        } else if value > def.max {
            warnings.push(format!(
                "{}: {} exceeds the section maximum ({} > {})",
                prefix, def.label, value, def.max
            ));
        }
    }
    let sum = sections.sum();
    if (sum - total_score).abs() > 1e-9 {
        warnings.push(format!(
            "{}: total {} does not match the section sum {}",
            prefix, total_score, sum
        ));
    }
    warnings
}

fn ensure_student(
    conn: &Connection,
    student_id: &str,
    name: &str,
) -> rusqlite::Result<bool> {
    if db::student_exists(conn, student_id)? {
        return Ok(false);
    }
    let created_at = chrono::Utc::now().to_rfc3339();
    // Auto-created students get their id as the bootstrap password.
    conn.execute(
        "INSERT INTO students(student_id, name, email, password, created_at)
         VALUES(?, ?, NULL, ?, ?)",
        (student_id, name, student_id, &created_at),
    )?;
    Ok(true)
}

fn handle_scores_import_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let csv_path = match required_str(req, "csvPath") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let test_name = match required_str(req, "testName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let test_date = match required_test_date(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let test_type = match required_test_type(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if test_type == TestType::Legacy400 {
        return err(
            &req.id,
            "bad_params",
            "legacy records are not imported via the subject-score CSV",
            None,
        );
    }
    let config = crate::testconfig::config_for(test_type);

    let text = match csv::read_csv_file(std::path::Path::new(&csv_path)) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "csv_read_failed", e.to_string(), None),
    };
    let (rows, mut warnings) = csv::parse_score_rows(&text);
    if rows.is_empty() && warnings.is_empty() {
        return err(&req.id, "bad_params", "csv file has no data rows", None);
    }

    let mut imported = 0usize;
    let mut skipped = 0usize;
    let mut created_students = 0usize;

    for row in &rows {
        let prefix = format!("row {}", row.line_no);
        let sections = SectionScores::Subjects(row.sections);
        warnings.extend(validation_warnings(&prefix, config, &sections, row.total_score));

        match ensure_student(conn, &row.student_id, &row.name) {
            Ok(true) => created_students += 1,
            Ok(false) => {}
            Err(e) => {
                warnings.push(format!("{}: student create failed: {}", prefix, e));
                continue;
            }
        }

        // Re-import never updates in place: an existing record for the
        // same student and administration is left untouched.
        match db::score_exists(conn, &row.student_id, &test_name, &test_date) {
            Ok(true) => {
                skipped += 1;
                warnings.push(format!(
                    "{}: student {} already has a record for {} ({}), skipped",
                    prefix, row.student_id, test_name, test_date
                ));
                continue;
            }
            Ok(false) => {}
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }

        let id = Uuid::new_v4().to_string();
        let created_at = chrono::Utc::now().to_rfc3339();
        let new_score = db::NewScore {
            id: &id,
            student_id: &row.student_id,
            name: &row.name,
            test_name: &test_name,
            test_date: &test_date,
            test_type,
            sections: &sections,
            total_score: row.total_score,
            max_score: row.max_score.or(Some(config.total_questions)),
            created_at: &created_at,
        };
        if let Err(e) = db::insert_score(conn, &new_score) {
            warnings.push(format!("{}: insert failed: {}", prefix, e));
            continue;
        }
        imported += 1;
    }

    ok(
        &req.id,
        json!({
            "imported": imported,
            "skipped": skipped,
            "total": rows.len(),
            "createdStudents": created_students,
            "warnings": warnings
        }),
    )
}

/// Section scores from a `sections` params object, keyed by the
/// config's section keys. Unknown keys are rejected so a typo never
/// silently drops a score.
fn sections_from_params(
    req: &Request,
    config: &TestConfig,
) -> Result<SectionScores, serde_json::Value> {
    let Some(obj) = req.params.get("sections").and_then(|v| v.as_object()) else {
        return Err(err(&req.id, "bad_params", "missing sections object", None));
    };

    for key in obj.keys() {
        if config.section(key).is_none() {
            return Err(err(
                &req.id,
                "bad_params",
                format!("unknown section for {}: {}", config.test_type.as_str(), key),
                Some(json!({ "section": key })),
            ));
        }
    }

    let value = |key: &str| -> f64 {
        obj.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0)
    };

    Ok(match config.test_type {
        TestType::Legacy400 => SectionScores::Parts(PartScores {
            a: value("part_a"),
            b: value("part_b"),
            c: value("part_c"),
            d: value("part_d"),
        }),
        TestType::Q100 | TestType::Q80 => SectionScores::Subjects(SubjectScores {
            kanri: value("section_kanri"),
            kaibou: value("section_kaibou"),
            gakkou: value("section_gakkou"),
            rikou: value("section_rikou"),
            yushou: value("section_yushou"),
            shikan: value("section_shikan"),
            kyousei: value("section_kyousei"),
            shouni: value("section_shouni"),
        }),
    })
}

fn handle_scores_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let test_name = match required_str(req, "testName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let test_date = match required_test_date(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let test_type = match required_test_type(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let config = crate::testconfig::config_for(test_type);

    let sections = match sections_from_params(req, config) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let total_score = req
        .params
        .get("totalScore")
        .and_then(|v| v.as_f64())
        .unwrap_or_else(|| sections.sum());
    let name = opt_str(req, "name").unwrap_or_else(|| student_id.clone());

    match ensure_student(conn, &student_id, &name) {
        Ok(_) => {}
        Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
    }

    match db::score_exists(conn, &student_id, &test_name, &test_date) {
        Ok(true) => {
            return err(
                &req.id,
                "duplicate_score",
                "student already has a record for this test administration",
                Some(json!({
                    "studentId": student_id,
                    "testName": test_name,
                    "testDate": test_date
                })),
            );
        }
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let warnings = validation_warnings("record", config, &sections, total_score);

    let id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    let new_score = db::NewScore {
        id: &id,
        student_id: &student_id,
        name: &name,
        test_name: &test_name,
        test_date: &test_date,
        test_type,
        sections: &sections,
        total_score,
        max_score: Some(config.total_questions),
        created_at: &created_at,
    };
    if let Err(e) = db::insert_score(conn, &new_score) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "test_scores" })),
        );
    }

    ok(&req.id, json!({ "scoreId": id, "warnings": warnings }))
}

fn record_json(record: &ScoreRecord) -> serde_json::Value {
    let config = record.config();
    let sections: Vec<serde_json::Value> = config
        .sections
        .iter()
        .map(|def| {
            json!({
                "key": def.key,
                "label": def.label,
                "score": record.sections.get(def.key).unwrap_or(0.0),
                "max": def.max
            })
        })
        .collect();
    json!({
        "id": record.id,
        "studentId": record.student_id,
        "name": record.name,
        "testName": record.test_name,
        "testDate": record.test_date,
        "testType": record.test_type.as_str(),
        "sections": sections,
        "totalScore": record.effective_total(),
        "storedTotal": record.stored_total,
        "totalMismatch": record.total_mismatch(),
        "isPassing": stats::is_passing(record),
        "createdAt": record.created_at
    })
}

fn handle_scores_list_by_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let records = match db::load_student_scores(conn, &student_id) {
        Ok(v) => v,
        Err(e) => return load_err(req, e),
    };

    let rows: Vec<serde_json::Value> = records.iter().map(record_json).collect();
    ok(&req.id, json!({ "scores": rows }))
}

fn handle_scores_delete_by_test(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let test_name = match required_str(req, "testName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let test_date = match required_str(req, "testDate") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match db::delete_cohort(conn, &test_name, &test_date) {
        Ok(deleted) => ok(&req.id, json!({ "deletedCount": deleted })),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "test_scores" })),
        ),
    }
}

fn handle_tests_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "tests": [] }));
    };

    let rows = match db::list_tests(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let tests: Vec<serde_json::Value> = rows
        .iter()
        .map(|t| {
            json!({
                "testName": t.test_name,
                "testDate": t.test_date,
                "testType": t.test_type,
                "recordCount": t.record_count,
                "mixedTestTypes": t.mixed_test_types
            })
        })
        .collect();
    ok(&req.id, json!({ "tests": tests }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scores.importCsv" => Some(handle_scores_import_csv(state, req)),
        "scores.create" => Some(handle_scores_create(state, req)),
        "scores.listByStudent" => Some(handle_scores_list_by_student(state, req)),
        "scores.deleteByTest" => Some(handle_scores_delete_by_test(state, req)),
        "tests.list" => Some(handle_tests_list(state, req)),
        _ => None,
    }
}
