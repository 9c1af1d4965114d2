use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_seisekid");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn seisekid");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn seed_cohort(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &std::path::Path) {
    let csv = "学生ID,氏名,テスト名,テスト日付,総得点,管理,解剖,顎口,理工,有床,歯冠,矯正,小児,満点\n\
221017,前原 謙太,第1回模擬試験,2025-08-05,90,9,12,9,16,18,18,8,0,100\n\
231001,足立 晴仁,第1回模擬試験,2025-08-05,80,9,12,9,16,18,16,0,0,100\n\
231002,宇山 爾来,第1回模擬試験,2025-08-05,80,9,12,9,16,18,16,0,0,100\n\
231003,山田 太郎,第1回模擬試験,2025-08-05,70,9,12,9,16,18,6,0,0,100\n";
    let csv_path = workspace.join("scores.csv");
    std::fs::write(&csv_path, csv).expect("write csv");
    let import = request_ok(
        stdin,
        reader,
        "seed",
        "scores.importCsv",
        json!({
            "csvPath": csv_path.to_string_lossy(),
            "testName": "第1回模擬試験",
            "testDate": "2025-08-05",
            "testType": "100q"
        }),
    );
    assert_eq!(import.get("imported").and_then(|v| v.as_u64()), Some(4));
}

#[test]
fn tied_totals_share_a_rank_and_the_next_rank_skips() {
    let workspace = temp_dir("seiseki-rank-ties");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_cohort(&mut stdin, &mut reader, &workspace);

    let rankings = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "rankings.test",
        json!({ "testName": "第1回模擬試験", "testDate": "2025-08-05" }),
    );
    let rows = rankings
        .get("rows")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(rows.len(), 4);

    let ranks: Vec<i64> = rows
        .iter()
        .map(|r| r.get("rank").and_then(|v| v.as_i64()).unwrap())
        .collect();
    assert_eq!(ranks, vec![1, 2, 2, 4]);

    let totals: Vec<f64> = rows
        .iter()
        .map(|r| r.get("totalScore").and_then(|v| v.as_f64()).unwrap())
        .collect();
    assert_eq!(totals, vec![90.0, 80.0, 80.0, 70.0]);

    // Deviations: 90 -> 64.1, 80 -> 50, 70 -> 35.9.
    let devs: Vec<f64> = rows
        .iter()
        .map(|r| r.get("deviation").and_then(|v| v.as_f64()).unwrap())
        .collect();
    assert_eq!(devs, vec![64.1, 50.0, 50.0, 35.9]);
    assert_eq!(
        rows[0].get("deviationBand").and_then(|v| v.as_str()),
        Some("60-69")
    );
    assert_eq!(
        rows[3].get("deviationBand").and_then(|v| v.as_str()),
        Some("under40")
    );

    let bands = rankings
        .get("bands")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    let band_count = |name: &str| {
        bands
            .iter()
            .find(|b| b.get("band").and_then(|v| v.as_str()) == Some(name))
            .and_then(|b| b.get("count").and_then(|v| v.as_u64()))
            .unwrap()
    };
    assert_eq!(band_count("60-69"), 1);
    assert_eq!(band_count("50-59"), 2);
    assert_eq!(band_count("under40"), 1);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn identical_totals_all_get_deviation_fifty() {
    let workspace = temp_dir("seiseki-rank-flat");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let csv = "学生ID,氏名,テスト名,テスト日付,総得点,管理,解剖,顎口,理工,有床,歯冠,矯正,小児,満点\n\
221017,前原 謙太,再試験,2025-10-01,55,5,8,5,10,12,9,4,2,100\n\
231001,足立 晴仁,再試験,2025-10-01,55,5,8,5,10,12,9,4,2,100\n\
231002,宇山 爾来,再試験,2025-10-01,55,5,8,5,10,12,9,4,2,100\n";
    let csv_path = workspace.join("scores.csv");
    std::fs::write(&csv_path, csv).expect("write csv");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "scores.importCsv",
        json!({
            "csvPath": csv_path.to_string_lossy(),
            "testName": "再試験",
            "testDate": "2025-10-01",
            "testType": "100q"
        }),
    );

    let rankings = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "rankings.test",
        json!({ "testName": "再試験", "testDate": "2025-10-01" }),
    );
    let rows = rankings
        .get("rows")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(rows.len(), 3);
    for row in &rows {
        assert_eq!(row.get("rank").and_then(|v| v.as_i64()), Some(1));
        assert_eq!(row.get("deviation").and_then(|v| v.as_f64()), Some(50.0));
        // 55 is under the 100q line.
        assert_eq!(row.get("isPassing").and_then(|v| v.as_bool()), Some(false));
    }

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn section_ranking_orders_by_the_named_section() {
    let workspace = temp_dir("seiseki-rank-section");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_cohort(&mut stdin, &mut reader, &workspace);

    let rankings = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "rankings.section",
        json!({
            "testName": "第1回模擬試験",
            "testDate": "2025-08-05",
            "section": "section_shikan"
        }),
    );
    let rows = rankings
        .get("rows")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    // 歯冠 scores are 18 / 16 / 16 / 6.
    let ranks: Vec<i64> = rows
        .iter()
        .map(|r| r.get("rank").and_then(|v| v.as_i64()).unwrap())
        .collect();
    assert_eq!(ranks, vec![1, 2, 2, 4]);
    assert_eq!(rows[0].get("score").and_then(|v| v.as_f64()), Some(18.0));
    assert_eq!(
        rows[0].get("studentId").and_then(|v| v.as_str()),
        Some("221017")
    );

    // A key outside the cohort's configured layout is rejected.
    let bad = request(
        &mut stdin,
        &mut reader,
        "3",
        "rankings.section",
        json!({
            "testName": "第1回模擬試験",
            "testDate": "2025-08-05",
            "section": "part_a"
        }),
    );
    assert_eq!(bad.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        bad.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_params")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn total_rankings_average_across_administrations() {
    let workspace = temp_dir("seiseki-rank-total");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_cohort(&mut stdin, &mut reader, &workspace);

    // Second administration: only 231003 takes it and scores 80,
    // lifting their mean to 75.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "scores.create",
        json!({
            "studentId": "231003",
            "name": "山田 太郎",
            "testName": "第2回模擬試験",
            "testDate": "2025-09-02",
            "testType": "100q",
            "sections": {
                "section_kanri": 9, "section_kaibou": 12, "section_gakkou": 9,
                "section_rikou": 16, "section_yushou": 18, "section_shikan": 16,
                "section_kyousei": 0, "section_shouni": 0
            }
        }),
    );

    let rankings = request_ok(&mut stdin, &mut reader, "3", "rankings.total", json!({}));
    let rows = rankings
        .get("rows")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(rows.len(), 4);

    // Means: 221017 -> 90, 231001/231002 -> 80, 231003 -> 75.
    assert_eq!(rows[0].get("studentId").and_then(|v| v.as_str()), Some("221017"));
    assert_eq!(rows[0].get("rank").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(rows[0].get("avgScore").and_then(|v| v.as_f64()), Some(90.0));
    assert_eq!(rows[1].get("rank").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(rows[2].get("rank").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(rows[3].get("studentId").and_then(|v| v.as_str()), Some("231003"));
    assert_eq!(rows[3].get("rank").and_then(|v| v.as_i64()), Some(4));
    assert_eq!(rows[3].get("avgScore").and_then(|v| v.as_f64()), Some(75.0));
    assert_eq!(rows[3].get("testCount").and_then(|v| v.as_u64()), Some(2));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
