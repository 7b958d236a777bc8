#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
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

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_examd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn examd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
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

pub fn request_ok(
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

/// Returns the error code of a request that is expected to fail.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string()
}

pub fn select_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
}

pub fn id_field(v: &serde_json::Value, key: &str) -> i64 {
    v.get(key)
        .and_then(|x| x.as_i64())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
}

/// Department with the given rooms `(code, capacity, rows, cols)`.
pub fn create_department(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    name: &str,
    rooms: &[(&str, i64, i64, i64)],
) -> (i64, Vec<i64>) {
    let dept = request_ok(stdin, reader, "dept", "departments.create", json!({ "name": name }));
    let department_id = id_field(&dept, "departmentId");
    let room_ids = rooms
        .iter()
        .map(|(code, capacity, rows, cols)| {
            let room = request_ok(
                stdin,
                reader,
                "room",
                "classrooms.create",
                json!({
                    "departmentId": department_id,
                    "input": {
                        "code": code,
                        "name": format!("Room {}", code),
                        "capacity": capacity,
                        "rows": rows,
                        "cols": cols
                    }
                }),
            );
            id_field(&room, "classroomId")
        })
        .collect();
    (department_id, room_ids)
}

pub fn create_course(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    department_id: i64,
    code: &str,
) -> i64 {
    let course = request_ok(
        stdin,
        reader,
        "course",
        "courses.create",
        json!({
            "departmentId": department_id,
            "code": code,
            "name": format!("Course {}", code),
        }),
    );
    id_field(&course, "courseId")
}

/// Creates students `<prefix>000..` and enrolls them in `course_id`.
pub fn enroll_new_students(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    course_id: i64,
    prefix: &str,
    count: usize,
) -> Vec<i64> {
    let ids: Vec<i64> = (0..count)
        .map(|i| {
            let s = request_ok(
                stdin,
                reader,
                "student",
                "students.create",
                json!({
                    "studentNo": format!("{}{:03}", prefix, i),
                    "fullName": format!("Student {}{}", prefix, i),
                    "classLevel": 1
                }),
            );
            id_field(&s, "studentId")
        })
        .collect();
    let _ = request_ok(
        stdin,
        reader,
        "enroll",
        "enrollments.bulkAdd",
        json!({ "courseId": course_id, "studentIds": ids }),
    );
    ids
}
