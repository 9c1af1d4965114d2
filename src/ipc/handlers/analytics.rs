use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, load_err, required_str};
use crate::ipc::types::{AppState, Request};
use crate::stats::{self, round1, ScoreRecord};
use serde_json::json;
use std::collections::HashMap;

fn section_averages_json(averages: &stats::CohortAverages) -> Vec<serde_json::Value> {
    averages
        .sections
        .iter()
        .map(|s| {
            json!({
                "key": s.key,
                "label": s.label,
                "average": round1(s.average)
            })
        })
        .collect()
}

fn handle_analytics_test_open(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    // An empty cohort is a valid "no data" answer, not an error.
    let Some(averages) = stats::aggregate(&cohort) else {
        return ok(
            &req.id,
            json!({ "found": false, "testName": test_name, "testDate": test_date }),
        );
    };

    let totals: Vec<f64> = cohort.iter().map(|r| r.effective_total()).collect();
    let max_total = totals.iter().cloned().fold(f64::MIN, f64::max);
    let min_total = totals.iter().cloned().fold(f64::MAX, f64::min);
    let std_dev = stats::population_std_dev(&totals);

    // Judged per record against its own test type, so a cohort that
    // violates the shared-type invariant still judges each row right.
    let passing_count = cohort.iter().filter(|r| stats::is_passing(r)).count();
    let passing_rate = 100.0 * (passing_count as f64) / (cohort.len() as f64);
    let mismatch_count = cohort.iter().filter(|r| r.total_mismatch()).count();

    let config = cohort[0].config();

    ok(
        &req.id,
        json!({
            "found": true,
            "testName": test_name,
            "testDate": test_date,
            "testType": config.test_type.as_str(),
            "passingScore": config.passing_score(),
            "studentCount": averages.student_count,
            "avgScore": round1(averages.total_average),
            "maxScore": max_total,
            "minScore": min_total,
            "stdDev": round1(std_dev),
            "passingCount": passing_count,
            "passingRate": round1(passing_rate),
            "totalMismatchCount": mismatch_count,
            "sectionAverages": section_averages_json(&averages)
        }),
    )
}

/// Presentation rows for one student: each record merged with its
/// cohort's averages, rank, and deviation, plus the student's overall
/// standing across every administration.
fn handle_analytics_student_open(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if records.is_empty() {
        return ok(&req.id, json!({ "found": false, "rows": [] }));
    }

    let mut rows = Vec::with_capacity(records.len());
    for record in &records {
        let cohort = match db::load_cohort(conn, &record.test_name, &record.test_date) {
            Ok(v) => v,
            Err(e) => return load_err(req, e),
        };
        rows.push(student_row(record, &cohort));
    }

    let all = match db::load_all_scores(conn) {
        Ok(v) => v,
        Err(e) => return load_err(req, e),
    };
    let overall = overall_standing(&all, &student_id);

    ok(
        &req.id,
        json!({
            "found": true,
            "studentId": student_id,
            "rows": rows,
            "overall": overall
        }),
    )
}

fn student_row(record: &ScoreRecord, cohort: &[ScoreRecord]) -> serde_json::Value {
    let config = record.config();

    let averages = stats::aggregate(cohort);
    let ranked = stats::rank_cohort(cohort, |r| r.effective_total());
    let rank = ranked
        .iter()
        .find(|row| row.record.id == record.id)
        .map(|row| row.rank);

    // Deviations align with the cohort's input order.
    let deviations = stats::deviation_scores(cohort);
    let deviation = cohort
        .iter()
        .position(|r| r.id == record.id)
        .map(|idx| round1(deviations[idx]));

    let sections: Vec<serde_json::Value> = config
        .sections
        .iter()
        .map(|def| {
            let avg = averages
                .as_ref()
                .and_then(|a| a.sections.iter().find(|s| s.key == def.key))
                .map(|s| round1(s.average));
            json!({
                "key": def.key,
                "label": def.label,
                "score": record.sections.get(def.key).unwrap_or(0.0),
                "max": def.max,
                "cohortAverage": avg
            })
        })
        .collect();

    json!({
        "id": record.id,
        "testName": record.test_name,
        "testDate": record.test_date,
        "testType": record.test_type.as_str(),
        "totalScore": record.effective_total(),
        "storedTotal": record.stored_total,
        "totalMismatch": record.total_mismatch(),
        "isPassing": stats::is_passing(record),
        "passingScore": config.passing_score(),
        "rank": rank,
        "cohortSize": cohort.len(),
        "deviation": deviation,
        "cohortTotalAverage": averages.as_ref().map(|a| round1(a.total_average)),
        "sections": sections
    })
}

/// Rank across students by mean total over every administration each
/// student took.
fn overall_standing(all: &[ScoreRecord], student_id: &str) -> serde_json::Value {
    let mut by_student: HashMap<&str, (f64, usize)> = HashMap::new();
    for record in all {
        let entry = by_student
            .entry(record.student_id.as_str())
            .or_insert((0.0, 0));
        entry.0 += record.effective_total();
        entry.1 += 1;
    }

    let mut averaged: Vec<(&str, f64)> = by_student
        .into_iter()
        .map(|(sid, (sum, count))| (sid, sum / (count as f64)))
        .collect();
    averaged.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });

    let ranks =
        stats::competition_ranks(&averaged.iter().map(|(_, avg)| *avg).collect::<Vec<_>>());
    for ((sid, avg), rank) in averaged.iter().zip(ranks) {
        if *sid == student_id {
            return json!({
                "rank": rank,
                "averageScore": round1(*avg),
                "studentCount": averaged.len()
            });
        }
    }
    serde_json::Value::Null
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.testOpen" => Some(handle_analytics_test_open(state, req)),
        "analytics.studentOpen" => Some(handle_analytics_student_open(state, req)),
        _ => None,
    }
}
