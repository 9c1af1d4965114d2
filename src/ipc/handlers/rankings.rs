use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, load_err, required_str};
use crate::ipc::types::{AppState, Request};
use crate::stats::{self, round1};
use serde_json::json;
use std::collections::HashMap;

/// Cohort ranking by recomputed total, with deviation scores and
/// display bands per row.
fn handle_rankings_test(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let cohort = match db::load_cohort(conn, &test_name, &test_date) {
        Ok(v) => v,
        Err(e) => return load_err(req, e),
    };
    if cohort.is_empty() {
        return ok(&req.id, json!({ "rows": [], "bands": [] }));
    }

    let ranked = stats::rank_cohort(&cohort, |r| r.effective_total());
    let deviations =
        stats::deviation_from_totals(&ranked.iter().map(|r| r.key).collect::<Vec<_>>());

    let mut band_counts: HashMap<&'static str, usize> = HashMap::new();
    let rows: Vec<serde_json::Value> = ranked
        .iter()
        .zip(&deviations)
        .map(|(row, dev)| {
            let band = stats::deviation_band(*dev);
            *band_counts.entry(band).or_insert(0) += 1;
            json!({
                "rank": row.rank,
                "studentId": row.record.student_id,
                "name": row.record.name,
                "totalScore": row.key,
                "totalMismatch": row.record.total_mismatch(),
                "isPassing": stats::is_passing(&row.record),
                "deviation": round1(*dev),
                "deviationBand": band
            })
        })
        .collect();

    let bands: Vec<serde_json::Value> = ["70+", "60-69", "50-59", "40-49", "under40"]
        .iter()
        .map(|band| {
            json!({
                "band": band,
                "count": band_counts.get(band).copied().unwrap_or(0)
            })
        })
        .collect();

    ok(&req.id, json!({ "rows": rows, "bands": bands }))
}

/// Cohort ranking by one configured section key.
fn handle_rankings_section(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let section = match required_str(req, "section") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let cohort = match db::load_cohort(conn, &test_name, &test_date) {
        Ok(v) => v,
        Err(e) => return load_err(req, e),
    };
    if cohort.is_empty() {
        return ok(&req.id, json!({ "rows": [] }));
    }

    // The section must belong to this cohort's configured layout;
    // ranking a legacy cohort by a subject key is meaningless.
    let config = cohort[0].config();
    let Some(def) = config.section(&section) else {
        return err(
            &req.id,
            "bad_params",
            format!(
                "section {} is not configured for {}",
                section,
                config.test_type.as_str()
            ),
            Some(json!({ "section": section })),
        );
    };

    let ranked = stats::rank_cohort(&cohort, |r| r.sections.get(&section).unwrap_or(0.0));
    let rows: Vec<serde_json::Value> = ranked
        .iter()
        .map(|row| {
            json!({
                "rank": row.rank,
                "studentId": row.record.student_id,
                "name": row.record.name,
                "score": row.key
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "section": { "key": def.key, "label": def.label, "max": def.max },
            "rows": rows
        }),
    )
}

/// All students ranked by mean total across every administration they
/// took.
fn handle_rankings_total(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let all = match db::load_all_scores(conn) {
        Ok(v) => v,
        Err(e) => return load_err(req, e),
    };
    if all.is_empty() {
        return ok(&req.id, json!({ "rows": [] }));
    }

    struct Acc {
        name: String,
        sum: f64,
        count: usize,
    }

    let mut by_student: HashMap<String, Acc> = HashMap::new();
    for record in &all {
        let entry = by_student
            .entry(record.student_id.clone())
            .or_insert_with(|| Acc {
                name: record.name.clone(),
                sum: 0.0,
                count: 0,
            });
        entry.sum += record.effective_total();
        entry.count += 1;
        // A later record may carry the name an earlier row lacked.
        if entry.name.is_empty() && !record.name.is_empty() {
            entry.name = record.name.clone();
        }
    }

    let mut aggregated: Vec<(String, String, f64, usize)> = by_student
        .into_iter()
        .map(|(sid, acc)| (sid, acc.name, acc.sum / (acc.count as f64), acc.count))
        .collect();
    aggregated.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    let ranks =
        stats::competition_ranks(&aggregated.iter().map(|(_, _, avg, _)| *avg).collect::<Vec<_>>());
    let rows: Vec<serde_json::Value> = aggregated
        .iter()
        .zip(ranks)
        .map(|((sid, name, avg, count), rank)| {
            json!({
                "rank": rank,
                "studentId": sid,
                "name": name,
                "avgScore": round1(*avg),
                "testCount": count
            })
        })
        .collect();

    ok(&req.id, json!({ "rows": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "rankings.test" => Some(handle_rankings_test(state, req)),
        "rankings.section" => Some(handle_rankings_section(state, req)),
        "rankings.total" => Some(handle_rankings_total(state, req)),
        _ => None,
    }
}
