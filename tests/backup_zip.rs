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

#[test]
fn bundle_roundtrip_restores_scores_into_a_fresh_workspace() {
    let source = temp_dir("seiseki-backup-src");
    let restored = temp_dir("seiseki-backup-dst");
    let bundle = source.join("backup.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": source.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "scores.create",
        json!({
            "studentId": "221017",
            "name": "前原 謙太",
            "testName": "第1回模擬試験",
            "testDate": "2025-08-05",
            "testType": "100q",
            "sections": {
                "section_kanri": 7, "section_kaibou": 9, "section_gakkou": 7,
                "section_rikou": 12, "section_yushou": 14, "section_shikan": 13,
                "section_kyousei": 7, "section_shouni": 6
            }
        }),
    );

    let export = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "backup.exportWorkspaceBundle",
        json!({
            "workspacePath": source.to_string_lossy(),
            "outPath": bundle.to_string_lossy()
        }),
    );
    assert_eq!(
        export.get("bundleFormat").and_then(|v| v.as_str()),
        Some("seiseki-workspace-v1")
    );
    let exported_sha = export
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .expect("export sha")
        .to_string();
    assert_eq!(exported_sha.len(), 64);
    assert!(bundle.is_file());

    // Restore into a different workspace, then open it and check the
    // data came back.
    let import = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "backup.importWorkspaceBundle",
        json!({
            "workspacePath": restored.to_string_lossy(),
            "inPath": bundle.to_string_lossy()
        }),
    );
    assert_eq!(
        import.get("dbSha256").and_then(|v| v.as_str()),
        Some(exported_sha.as_str())
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "workspace.select",
        json!({ "path": restored.to_string_lossy() }),
    );
    let scores = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "scores.listByStudent",
        json!({ "studentId": "221017" }),
    );
    let rows = scores
        .get("scores")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("totalScore").and_then(|v| v.as_f64()), Some(75.0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(source);
    let _ = std::fs::remove_dir_all(restored);
}

#[test]
fn tampered_bundle_fails_the_checksum_gate() {
    let source = temp_dir("seiseki-backup-tamper-src");
    let restored = temp_dir("seiseki-backup-tamper-dst");
    let bundle = source.join("backup.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": source.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "backup.exportWorkspaceBundle",
        json!({
            "workspacePath": source.to_string_lossy(),
            "outPath": bundle.to_string_lossy()
        }),
    );

    // Rewrite the bundle with the same manifest but a different
    // database payload; the recorded checksum no longer matches.
    let bundle_bytes = std::fs::read(&bundle).expect("read bundle");
    let reader_cursor = std::io::Cursor::new(bundle_bytes);
    let mut archive = zip::ZipArchive::new(reader_cursor).expect("open bundle");
    let mut manifest = String::new();
    std::io::Read::read_to_string(
        &mut archive.by_name("manifest.json").expect("manifest"),
        &mut manifest,
    )
    .expect("read manifest");

    let tampered_path = source.join("tampered.zip");
    let tampered_file = std::fs::File::create(&tampered_path).expect("create tampered");
    let mut writer = zip::ZipWriter::new(tampered_file);
    let opts = zip::write::FileOptions::default();
    writer.start_file("manifest.json", opts).expect("start manifest");
    std::io::Write::write_all(&mut writer, manifest.as_bytes()).expect("write manifest");
    writer
        .start_file("db/seiseki.sqlite3", opts)
        .expect("start db entry");
    std::io::Write::write_all(&mut writer, b"not a database").expect("write db entry");
    writer.finish().expect("finish tampered");

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "backup.importWorkspaceBundle",
        json!({
            "workspacePath": restored.to_string_lossy(),
            "inPath": tampered_path.to_string_lossy()
        }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("backup_import_failed")
    );
    let message = resp
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    assert!(message.contains("checksum"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(source);
    let _ = std::fs::remove_dir_all(restored);
}
