use crate::csv;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, opt_str, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    // Per-student record counts via correlated subquery so the admin
    // roster view needs no second round trip.
    let mut stmt = match conn.prepare(
        "SELECT
           s.student_id,
           s.name,
           s.email,
           s.created_at,
           (SELECT COUNT(*) FROM test_scores t WHERE t.student_id = s.student_id) AS score_count
         FROM students s
         ORDER BY s.student_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let student_id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let email: Option<String> = row.get(2)?;
            let created_at: Option<String> = row.get(3)?;
            let score_count: i64 = row.get(4)?;
            Ok(json!({
                "studentId": student_id,
                "name": name,
                "email": email,
                "createdAt": created_at,
                "scoreCount": score_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let email = opt_str(req, "email");
    let password = opt_str(req, "password");

    let exists = match db::student_exists(conn, &student_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists {
        return err(
            &req.id,
            "duplicate_student",
            "student already exists",
            Some(json!({ "studentId": student_id })),
        );
    }

    let created_at = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO students(student_id, name, email, password, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (&student_id, &name, &email, &password, &created_at),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id, "name": name }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch object", None);
    };

    let current: Option<(String, Option<String>, Option<String>)> = match conn
        .query_row(
            "SELECT name, email, password FROM students WHERE student_id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((mut name, mut email, mut password)) = current else {
        return err(&req.id, "not_found", "student not found", None);
    };

    if let Some(v) = patch.get("name").and_then(|v| v.as_str()) {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        name = trimmed.to_string();
    }
    if let Some(v) = patch.get("email") {
        email = v.as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    }
    if let Some(v) = patch.get("password") {
        password = v.as_str().map(|s| s.to_string()).filter(|s| !s.is_empty());
    }

    if let Err(e) = conn.execute(
        "UPDATE students SET name = ?, email = ?, password = ? WHERE student_id = ?",
        (&name, &email, &password, &student_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "studentId": student_id, "name": name }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists = match db::student_exists(conn, &student_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !exists {
        return err(&req.id, "not_found", "student not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Scores first; no ON DELETE CASCADE on the schema.
    let deleted_scores = match tx.execute("DELETE FROM test_scores WHERE student_id = ?", [&student_id]) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "test_scores" })),
            );
        }
    };
    if let Err(e) = tx.execute("DELETE FROM students WHERE student_id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "studentId": student_id, "deletedScoreCount": deleted_scores }),
    )
}

fn handle_students_import_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let csv_path = match required_str(req, "csvPath") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let text = match csv::read_csv_file(std::path::Path::new(&csv_path)) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "csv_read_failed", e.to_string(), None),
    };
    let (rows, mut warnings) = csv::parse_roster_rows(&text);

    let mut imported = 0usize;
    let mut skipped = 0usize;
    for row in &rows {
        let exists = match db::student_exists(conn, &row.student_id) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if exists {
            skipped += 1;
            warnings.push(format!(
                "row {}: student {} already exists, skipped",
                row.line_no, row.student_id
            ));
            continue;
        }

        let created_at = chrono::Utc::now().to_rfc3339();
        // Roster rows without a password get the student id, the
        // bootstrap credential the school hands out.
        let password = row.password.clone().unwrap_or_else(|| row.student_id.clone());
        if let Err(e) = conn.execute(
            "INSERT INTO students(student_id, name, email, password, created_at)
             VALUES(?, ?, ?, ?, ?)",
            (&row.student_id, &row.name, &row.email, &password, &created_at),
        ) {
            warnings.push(format!("row {}: insert failed: {}", row.line_no, e));
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
            "warnings": warnings
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "students.importCsv" => Some(handle_students_import_csv(state, req)),
        _ => None,
    }
}
