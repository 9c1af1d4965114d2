use crate::backup;
use crate::csv;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, load_err, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_backup_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace_path = match required_str(req, "workspacePath")
        .map(PathBuf::from)
        .or_else(|e| state.workspace.clone().ok_or(e))
    {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };

    match backup::export_workspace_bundle(&workspace_path, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormat": summary.bundle_format,
                "entryCount": summary.entry_count,
                "dbSha256": summary.db_sha256,
                "outPath": out_path.to_string_lossy()
            }),
        ),
        Err(e) => err(&req.id, "backup_export_failed", e.to_string(), None),
    }
}

fn handle_backup_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace_path = match required_str(req, "workspacePath")
        .map(PathBuf::from)
        .or_else(|e| state.workspace.clone().ok_or(e))
    {
        Ok(v) => v,
        Err(e) => return e,
    };
    let in_path = match required_str(req, "inPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };

    // Drop the open handle before the database file is replaced.
    if state.workspace.as_deref() == Some(workspace_path.as_path()) {
        state.db = None;
    }

    let summary = match backup::import_workspace_bundle(&in_path, &workspace_path) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "backup_import_failed", e.to_string(), None),
    };

    if state.workspace.as_deref() == Some(workspace_path.as_path()) {
        match db::open_db(&workspace_path) {
            Ok(conn) => state.db = Some(conn),
            Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
        }
    }

    ok(
        &req.id,
        json!({
            "bundleFormatDetected": summary.bundle_format_detected,
            "dbSha256": summary.db_sha256
        }),
    )
}

fn handle_csv_template(state: &mut AppState, req: &Request) -> serde_json::Value {
    let _ = state;
    let kind = match required_str(req, "kind") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match csv::template(&kind) {
        Some(t) => ok(
            &req.id,
            json!({ "filename": t.filename, "content": t.content }),
        ),
        None => err(
            &req.id,
            "bad_params",
            "kind must be one of: students, testResults, testResultsLegacy",
            Some(json!({ "kind": kind })),
        ),
    }
}

fn handle_export_scores_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let out_path = match required_str(req, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };

    let cohort = match db::load_cohort(conn, &test_name, &test_date) {
        Ok(v) => v,
        Err(e) => return load_err(req, e),
    };

    // Written in the import column order so an export re-imports
    // unchanged.
    let mut lines = Vec::with_capacity(cohort.len() + 1);
    lines.push(csv::SCORE_HEADERS.join(","));
    for record in &cohort {
        let config = record.config();
        let sections: Vec<String> = config
            .sections
            .iter()
            .map(|def| format!("{}", record.sections.get(def.key).unwrap_or(0.0)))
            .collect();
        lines.push(format!(
            "{},{},{},{},{},{},{}",
            record.student_id,
            record.name,
            record.test_name,
            record.test_date,
            record.effective_total(),
            sections.join(","),
            config.total_questions
        ));
    }
    let content = format!("{}{}", csv::UTF8_BOM, lines.join("\n"));

    if let Some(parent) = out_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return err(&req.id, "csv_write_failed", e.to_string(), None);
        }
    }
    if let Err(e) = std::fs::write(&out_path, content) {
        return err(&req.id, "csv_write_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "rowCount": cohort.len(),
            "outPath": out_path.to_string_lossy()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_backup_export(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_backup_import(state, req)),
        "exchange.csvTemplate" => Some(handle_csv_template(state, req)),
        "exchange.exportScoresCsv" => Some(handle_export_scores_csv(state, req)),
        _ => None,
    }
}
