use rusqlite::Connection;
use serde_json::json;

use crate::db::LoadError;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::testconfig::TestType;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn opt_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// `testType` parameter; unknown values are rejected, never defaulted.
pub fn required_test_type(req: &Request) -> Result<TestType, serde_json::Value> {
    let raw = required_str(req, "testType")?;
    TestType::parse(&raw).ok_or_else(|| {
        err(
            &req.id,
            "unknown_test_type",
            format!("unknown test type: {}", raw),
            Some(json!({ "testType": raw })),
        )
    })
}

/// `testDate` parameter, validated as a calendar date.
pub fn required_test_date(req: &Request) -> Result<String, serde_json::Value> {
    let raw = required_str(req, "testDate")?;
    if chrono::NaiveDate::parse_from_str(&raw, "%Y-%m-%d").is_err() {
        return Err(err(
            &req.id,
            "bad_params",
            "testDate must be YYYY-MM-DD",
            Some(json!({ "testDate": raw })),
        ));
    }
    Ok(raw)
}

pub fn load_err(req: &Request, e: LoadError) -> serde_json::Value {
    match e {
        LoadError::Db(e) => err(&req.id, "db_query_failed", e.to_string(), None),
        LoadError::UnknownTestType { test_type } => err(
            &req.id,
            "unknown_test_type",
            format!("stored record has unknown test type: {}", test_type),
            Some(json!({ "testType": test_type })),
        ),
    }
}
