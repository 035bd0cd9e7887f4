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
    let exe = env!("CARGO_BIN_EXE_attendanced");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn attendanced");
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
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
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
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

fn seed_class(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
    students: &[(&str, &str)],
) -> (String, Vec<String>) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(stdin, reader, "cls", "classes.create", json!({ "name": "7B" }));
    let class_id = created
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let mut ids = Vec::new();
    for (i, (last_name, roll)) in students.iter().enumerate() {
        let res = request_ok(
            stdin,
            reader,
            &format!("stu{}", i),
            "students.create",
            json!({
                "classId": class_id,
                "lastName": last_name,
                "firstName": "Kid",
                "rollNumber": roll
            }),
        );
        ids.push(
            res.get("studentId")
                .and_then(|v| v.as_str())
                .expect("studentId")
                .to_string(),
        );
    }
    (class_id, ids)
}

fn entry_ids(session: &serde_json::Value) -> Vec<String> {
    session
        .get("entries")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|e| e.get("studentId").and_then(|v| v.as_str()).map(|s| s.to_string()))
        .collect()
}

fn cursor(session: &serde_json::Value) -> u64 {
    session.get("cursor").and_then(|v| v.as_u64()).expect("cursor")
}

#[test]
fn marking_sorts_by_roll_creates_once_and_advances_cursor() {
    let workspace = temp_dir("attendanced-marking");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, ids) = seed_class(
        &mut stdin,
        &mut reader,
        &workspace,
        &[("Ames", "5"), ("Bell", "2")],
    );
    let (ames, bell) = (ids[0].clone(), ids[1].clone());

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "session.open",
        json!({
            "classId": class_id,
            "date": "2026-10-19",
            "periodId": "p1",
            "sessionYearId": "2026"
        }),
    );
    let session = &opened["session"];
    assert_eq!(session["loadState"], "loaded");
    assert_eq!(session["profile"], "period");
    assert_eq!(entry_ids(session), vec![bell.clone(), ames.clone()]);
    assert_eq!(cursor(session), 0);

    let marked = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "session.mark",
        json!({ "studentId": bell, "status": "present" }),
    );
    assert_eq!(marked["outcome"], "committed");
    let record_id = marked["recordId"].as_str().expect("recordId").to_string();
    assert_eq!(cursor(&marked["session"]), 1);
    assert_eq!(marked["session"]["entries"][0]["isSaving"], false);
    assert_eq!(marked["session"]["entries"][0]["saveState"], "committed");

    let remarked = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "session.mark",
        json!({ "studentId": bell, "status": "late" }),
    );
    assert_eq!(remarked["recordId"], record_id.as_str());
    assert_eq!(remarked["session"]["entries"][0]["status"], "late");

    let last = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "session.mark",
        json!({ "studentId": ames, "status": "half-day" }),
    );
    assert_eq!(cursor(&last["session"]), 1);
    assert_eq!(last["session"]["summary"]["unmarked"], 0);
    assert_eq!(last["session"]["summary"]["counts"]["half_day"], 1);

    // Marks survive a reload, and the stored record ids are picked up again.
    let reloaded = request_ok(&mut stdin, &mut reader, "5", "session.reload", json!({}));
    let entries = reloaded["session"]["entries"].as_array().expect("entries");
    assert_eq!(entries[0]["status"], "late");
    assert_eq!(entries[0]["recordId"], record_id.as_str());
    assert_eq!(entries[1]["status"], "half_day");
    assert_eq!(reloaded["session"]["generation"], 2);

    let missing = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "session.mark",
        json!({ "studentId": "nobody", "status": "present" }),
    );
    assert_eq!(missing["outcome"], "notFound");

    let disabled = request(
        &mut stdin,
        &mut reader,
        "7",
        "session.mark",
        json!({ "studentId": ames, "status": "leave" }),
    );
    assert_eq!(error_code(&disabled), Some("status_not_enabled"));

    drop(stdin);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn other_period_starts_unmarked_and_remarks_sync_after_first_save() {
    let workspace = temp_dir("attendanced-remarks");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, ids) = seed_class(&mut stdin, &mut reader, &workspace, &[("Cole", "1")]);
    let student = ids[0].clone();

    let scope = |period: &str| {
        json!({
            "classId": class_id,
            "date": "2026-10-19",
            "periodId": period,
            "sessionYearId": "2026"
        })
    };
    let _ = request_ok(&mut stdin, &mut reader, "1", "session.open", scope("p1"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "session.setRemark",
        json!({ "studentId": student, "remark": "doctor visit" }),
    );
    let local = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "session.commitRemark",
        json!({ "studentId": student }),
    );
    assert_eq!(local["sync"], "localOnly");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "session.mark",
        json!({ "studentId": student, "status": "excused" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "session.setRemark",
        json!({ "studentId": student, "remark": "doctor visit, note received" }),
    );
    let sent = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "session.commitRemark",
        json!({ "studentId": student }),
    );
    assert_eq!(sent["sync"], "sent");

    let p2 = request_ok(&mut stdin, &mut reader, "7", "session.open", scope("p2"));
    assert_eq!(p2["session"]["periodId"], "p2");
    assert!(p2["session"]["entries"][0]["status"].is_null());

    let p1 = request_ok(&mut stdin, &mut reader, "8", "session.open", scope("p1"));
    let entry = &p1["session"]["entries"][0];
    assert_eq!(entry["status"], "excused");
    assert_eq!(entry["remark"], "doctor visit, note received");

    drop(stdin);
    let _ = std::fs::remove_dir_all(workspace);
}
