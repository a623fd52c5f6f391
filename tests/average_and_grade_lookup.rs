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

fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    username: &str,
) -> String {
    let student = request_ok(
        stdin,
        reader,
        id,
        "students.create",
        json!({
            "firstName": "Test",
            "lastName": "Student",
            "username": username,
            "email": format!("{username}@example.ac.uk")
        }),
    );
    student
        .pointer("/student/id")
        .and_then(|v| v.as_str())
        .expect("student id")
        .to_string()
}

#[test]
fn student_average_is_the_mean_of_scored_grades() {
    let workspace = temp_dir("rosterd-average");
    let (_child, mut stdin, mut reader) = spawn_daemon();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let scores = [85, 92, 78, 88, 95];
    for (i, _) in scores.iter().enumerate() {
        let code = format!("COMP{:04}", i + 1);
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("m{i}"),
            "modules.submit",
            json!({ "code": code, "name": format!("Module {code}"), "mnc": false }),
        );
    }
    let student_id = create_student(&mut stdin, &mut reader, "2", "avgstudent");

    for (i, score) in scores.iter().enumerate() {
        let code = format!("COMP{:04}", i + 1);
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("g{i}"),
            "grades.submit",
            json!({ "studentId": student_id, "moduleCode": code, "score": score.to_string() }),
        );
    }

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.studentAverage",
        json!({ "studentId": student_id }),
    );
    let average = result.get("average").and_then(|v| v.as_f64()).expect("average");
    assert!((average - 87.6).abs() < 1e-9, "average was {average}");
}

#[test]
fn average_with_no_grades_is_no_grade_available() {
    let workspace = temp_dir("rosterd-average-empty");
    let (_child, mut stdin, mut reader) = spawn_daemon();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student_id = create_student(&mut stdin, &mut reader, "2", "gradeless");

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "grades.studentAverage",
        json!({ "studentId": student_id }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("no_grade_available")
    );
}

#[test]
fn grade_lookup_for_ungraded_module_is_no_grade_available() {
    let workspace = temp_dir("rosterd-grade-for");
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
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "modules.submit",
        json!({ "code": "COMP0004", "name": "Object-Oriented Programming", "mnc": true }),
    );
    let student_id = create_student(&mut stdin, &mut reader, "4", "partial");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grades.submit",
        json!({ "studentId": student_id, "moduleCode": "COMP0010", "score": "78" }),
    );

    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "grades.gradeFor",
        json!({ "studentId": student_id, "moduleCode": "COMP0010" }),
    );
    assert_eq!(graded.pointer("/grade/score").and_then(|v| v.as_i64()), Some(78));

    let ungraded = request(
        &mut stdin,
        &mut reader,
        "7",
        "grades.gradeFor",
        json!({ "studentId": student_id, "moduleCode": "COMP0004" }),
    );
    assert_eq!(
        ungraded.pointer("/error/code").and_then(|v| v.as_str()),
        Some("no_grade_available")
    );

    let unknown_module = request(
        &mut stdin,
        &mut reader,
        "8",
        "grades.gradeFor",
        json!({ "studentId": student_id, "moduleCode": "COMP9999" }),
    );
    assert_eq!(
        unknown_module.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );
}

#[test]
fn grading_does_not_require_registration() {
    let workspace = temp_dir("rosterd-unregistered-grade");
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
    let student_id = create_student(&mut stdin, &mut reader, "3", "unregistered");

    // No registrations.create beforehand; the submission must still land.
    let grade = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.submit",
        json!({ "studentId": student_id, "moduleCode": "COMP0010", "score": "61" }),
    );
    assert_eq!(grade.pointer("/grade/score").and_then(|v| v.as_i64()), Some(61));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "registrations.list",
        json!({ "studentId": student_id }),
    );
    let modules = listed.get("modules").and_then(|v| v.as_array()).expect("modules");
    assert!(modules.is_empty());
}
