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

#[test]
fn default_profile_and_key_overrides_persist_in_the_workspace() {
    let workspace = temp_dir("attendanced-setup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (class_id, _ids) = seed_class(&mut stdin, &mut reader, &workspace, &[("Ames", "1")]);

    let initial = request_ok(&mut stdin, &mut reader, "1", "setup.get", json!({}));
    assert_eq!(initial["attendance"]["defaultProfile"], "period");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({
            "section": "attendance",
            "patch": {
                "defaultProfile": "daily",
                "keyOverrides": { "daily": { "o": "holiday" } }
            }
        }),
    );

    let profiles = request_ok(&mut stdin, &mut reader, "3", "attendance.profiles", json!({}));
    assert_eq!(profiles["defaultProfile"], "daily");
    let list = profiles["profiles"].as_array().expect("profiles");
    assert_eq!(list.len(), 2);
    let daily = list
        .iter()
        .find(|p| p["name"] == "daily")
        .expect("daily profile");
    let bindings = daily["bindings"].as_array().expect("bindings");
    assert!(bindings
        .iter()
        .any(|b| b["key"] == "l" && b["action"] == "leave"));
    assert!(bindings
        .iter()
        .any(|b| b["key"] == "o" && b["action"] == "holiday"));

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "session.open",
        json!({
            "classId": class_id,
            "date": "2026-10-19",
            "periodId": "day",
            "sessionYearId": "2026"
        }),
    );
    assert_eq!(opened["session"]["profile"], "daily");
    let holiday = request_ok(&mut stdin, &mut reader, "5", "session.key", json!({ "key": "o" }));
    assert_eq!(holiday["session"]["entries"][0]["status"], "holiday");

    let bad_binding = request(
        &mut stdin,
        &mut reader,
        "6",
        "setup.update",
        json!({
            "section": "attendance",
            "patch": { "keyOverrides": { "daily": { "x": "late" } } }
        }),
    );
    assert_eq!(error_code(&bad_binding), Some("bad_params"));

    let bad_section = request(
        &mut stdin,
        &mut reader,
        "7",
        "setup.update",
        json!({ "section": "reports", "patch": {} }),
    );
    assert_eq!(error_code(&bad_section), Some("bad_params"));

    let bad_profile = request(
        &mut stdin,
        &mut reader,
        "8",
        "session.open",
        json!({
            "classId": class_id,
            "date": "2026-10-19",
            "periodId": "day",
            "sessionYearId": "2026",
            "profile": "weekly"
        }),
    );
    assert_eq!(error_code(&bad_profile), Some("bad_params"));

    drop(stdin);
    drop(reader);

    // Reopening the workspace in a fresh process keeps the saved setup.
    let (_child2, mut stdin2, mut reader2) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin2,
        &mut reader2,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let saved = request_ok(&mut stdin2, &mut reader2, "1", "setup.get", json!({}));
    assert_eq!(saved["attendance"]["defaultProfile"], "daily");
    assert_eq!(saved["attendance"]["keyOverrides"]["daily"]["o"], "holiday");

    drop(stdin2);
    let _ = std::fs::remove_dir_all(workspace);
}
