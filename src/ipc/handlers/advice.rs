use crate::advice;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, load_err, opt_str, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_advice_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let student_name = opt_str(req, "studentName")
        .or_else(|| {
            records
                .first()
                .map(|r| r.name.clone())
                .filter(|n| !n.is_empty())
        })
        .unwrap_or_else(|| student_id.clone());

    match advice::generate(&student_name, &records) {
        Some(text) => ok(
            &req.id,
            json!({ "studentId": student_id, "advice": text }),
        ),
        None => err(
            &req.id,
            "not_found",
            "no score records for student",
            Some(json!({ "studentId": student_id })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "advice.generate" => Some(handle_advice_generate(state, req)),
        _ => None,
    }
}
