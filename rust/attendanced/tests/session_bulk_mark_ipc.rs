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

fn open_scope(class_id: &str, period: &str) -> serde_json::Value {
    json!({
        "classId": class_id,
        "date": "2026-10-19",
        "periodId": period,
        "sessionYearId": "2026"
    })
}

#[test]
fn mark_all_remaining_fills_only_unmarked_students() {
    let workspace = temp_dir("attendanced-bulk");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, ids) = seed_class(
        &mut stdin,
        &mut reader,
        &workspace,
        &[("Ames", "1"), ("Bell", "2"), ("Cole", "3"), ("Dunn", "4")],
    );
    let _ = request_ok(&mut stdin, &mut reader, "1", "session.open", open_scope(&class_id, "p1"));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "session.mark",
        json!({ "studentId": ids[1], "status": "absent" }),
    );

    let bulk = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "session.markAllRemaining",
        json!({ "status": "present" }),
    );
    assert_eq!(bulk["outcome"], "applied");
    assert_eq!(bulk["created"], 3);
    let entries = bulk["session"]["entries"].as_array().expect("entries");
    assert_eq!(entries[1]["status"], "absent");
    for idx in [0usize, 2, 3] {
        assert_eq!(entries[idx]["status"], "present");
        assert!(entries[idx]["recordId"].is_string());
    }
    assert_eq!(bulk["session"]["summary"]["unmarked"], 0);

    let again = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "session.markAllRemaining",
        json!({ "status": "present" }),
    );
    assert_eq!(again["outcome"], "nothingToMark");
    assert_eq!(again["created"], 0);
    let notices = again["session"]["notices"].as_array().expect("notices");
    let last = notices.last().expect("notice");
    assert_eq!(last["level"], "info");
    let notice_id = last["id"].as_u64().expect("notice id");

    let dismissed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "session.dismissNotice",
        json!({ "noticeId": notice_id }),
    );
    assert_eq!(dismissed["dismissed"], true);

    let disabled = request(
        &mut stdin,
        &mut reader,
        "6",
        "session.markAllRemaining",
        json!({ "status": "holiday" }),
    );
    assert_eq!(error_code(&disabled), Some("status_not_enabled"));

    drop(stdin);
    let _ = std::fs::remove_dir_all(workspace);
}
