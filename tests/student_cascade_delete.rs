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

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rosterd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rosterd");
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
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn deleting_a_student_removes_its_grades_and_registrations() {
    let workspace = temp_dir("rosterd-student-cascade");
    let (_child, mut stdin, mut reader) = spawn_daemon();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "modules.submit",
        json!({ "code": "COMP0010", "name": "Software Engineering", "mnc": false }),
    );
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({
            "firstName": "Ada",
            "lastName": "Lovelace",
            "username": "alovelace",
            "email": "ada@example.ac.uk"
        }),
    );
    let student_id = student
        .pointer("/student/id")
        .and_then(|v| v.as_str())
        .expect("student id")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "registrations.create",
        json!({ "studentId": student_id, "moduleCode": "COMP0010" }),
    );
    let grade = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grades.submit",
        json!({ "studentId": student_id, "moduleCode": "COMP0010", "score": "55" }),
    );
    let grade_id = grade
        .pointer("/grade/id")
        .and_then(|v| v.as_str())
        .expect("grade id")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.delete",
        json!({ "studentId": student_id }),
    );

    let student_gone = request(
        &mut stdin,
        &mut reader,
        "7",
        "students.get",
        json!({ "studentId": student_id }),
    );
    assert_eq!(
        student_gone.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );

    let grade_gone = request(
        &mut stdin,
        &mut reader,
        "8",
        "grades.get",
        json!({ "gradeId": grade_id }),
    );
    assert_eq!(
        grade_gone.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );

    let all_grades = request_ok(&mut stdin, &mut reader, "9", "grades.list", json!({}));
    assert!(all_grades
        .get("grades")
        .and_then(|v| v.as_array())
        .expect("grades")
        .is_empty());

    // The module is not owned by the student and must survive.
    let module = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "modules.get",
        json!({ "code": "COMP0010" }),
    );
    assert_eq!(
        module.pointer("/module/code").and_then(|v| v.as_str()),
        Some("COMP0010")
    );
}

#[test]
fn student_update_replaces_fields() {
    let workspace = temp_dir("rosterd-student-update");
    let (_child, mut stdin, mut reader) = spawn_daemon();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "firstName": "Ada",
            "lastName": "Lovelace",
            "username": "alovelace",
            "email": "ada@example.ac.uk"
        }),
    );
    let student_id = student
        .pointer("/student/id")
        .and_then(|v| v.as_str())
        .expect("student id")
        .to_string();

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.update",
        json!({
            "studentId": student_id,
            "firstName": "Augusta",
            "lastName": "King",
            "username": "aking",
            "email": "augusta@example.ac.uk"
        }),
    );
    assert_eq!(
        updated.pointer("/student/firstName").and_then(|v| v.as_str()),
        Some("Augusta")
    );

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.get",
        json!({ "studentId": student_id }),
    );
    assert_eq!(
        fetched.pointer("/student/username").and_then(|v| v.as_str()),
        Some("aking")
    );

    let missing = request(
        &mut stdin,
        &mut reader,
        "5",
        "students.update",
        json!({
            "studentId": "nobody",
            "firstName": "A",
            "lastName": "B",
            "username": "ab",
            "email": "ab@example.ac.uk"
        }),
    );
    assert_eq!(
        missing.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );
}
