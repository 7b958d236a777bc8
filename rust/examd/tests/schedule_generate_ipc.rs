mod test_support;

use serde_json::json;
use std::time::{Duration, Instant};
use test_support::{
    create_course, create_department, enroll_new_students, request_err, request_ok,
    select_workspace, spawn_sidecar, temp_dir,
};

// 2025-01-06 is a Monday.
const MONDAY: &str = "2025-01-06";

#[test]
fn disjoint_courses_share_a_slot_and_shared_students_do_not() {
    let workspace = temp_dir("examd-schedule-basic");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let (dept, _) = create_department(&mut stdin, &mut reader, "CE", &[("A101", 40, 5, 8)]);
    let c1 = create_course(&mut stdin, &mut reader, dept, "CS101");
    let c2 = create_course(&mut stdin, &mut reader, dept, "CS102");
    let c3 = create_course(&mut stdin, &mut reader, dept, "CS201");
    let first = enroll_new_students(&mut stdin, &mut reader, c1, "A", 30);
    enroll_new_students(&mut stdin, &mut reader, c2, "B", 30);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "enrollments.add",
        json!({ "studentId": first[0], "courseId": c3 }),
    );

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.generate",
        json!({
            "departmentId": dept,
            "startDate": MONDAY,
            "endDate": MONDAY,
            "examTypes": ["Midterm"]
        }),
    );
    assert_eq!(summary["success"], true);
    assert_eq!(summary["scheduledCount"], 3);
    assert_eq!(summary["unscheduledCount"], 0);
    assert!(summary["runId"].as_str().is_some());

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.list",
        json!({ "departmentId": dept }),
    );
    let exams = list["exams"].as_array().expect("exams");
    assert_eq!(exams.len(), 3);
    let start_of = |code: &str| {
        exams
            .iter()
            .find(|e| e["courseCode"] == code)
            .and_then(|e| e["startTime"].as_str())
            .map(|s| s.to_string())
            .expect("exam")
    };
    assert_eq!(start_of("CS101"), "09:00");
    assert_eq!(start_of("CS102"), "09:00");
    assert_eq!(start_of("CS201"), "11:00");
    assert!(exams.iter().all(|e| e["examDate"] == MONDAY));
    assert!(exams
        .iter()
        .all(|e| e["classroomCodes"].as_array().map(|a| a.len()) == Some(1)));

    let load = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.classroomLoad",
        json!({ "departmentId": dept }),
    );
    let seated: i64 = load["rows"]
        .as_array()
        .expect("rows")
        .iter()
        .filter_map(|r| r["seatedCount"].as_i64())
        .sum();
    assert_eq!(seated, 61);

    let runs = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schedule.runs",
        json!({ "departmentId": dept }),
    );
    let runs = runs["runs"].as_array().expect("runs");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["runId"], summary["runId"]);
    assert_eq!(runs[0]["success"], true);
    assert_eq!(runs[0]["scheduledCount"], 3);

    let cleared = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "schedule.clear",
        json!({ "departmentId": dept }),
    );
    assert_eq!(cleared["cleared"], true);
    let list = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "schedule.list",
        json!({ "departmentId": dept }),
    );
    assert!(list["exams"].as_array().expect("exams").is_empty());
}

#[test]
fn configuration_errors_come_back_as_unsuccessful_summaries() {
    let workspace = temp_dir("examd-schedule-config");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let (dept, _) = create_department(&mut stdin, &mut reader, "CE", &[("A101", 40, 5, 8)]);
    let course = create_course(&mut stdin, &mut reader, dept, "CS101");
    enroll_new_students(&mut stdin, &mut reader, course, "A", 3);
    let (empty_dept, _) = create_department(&mut stdin, &mut reader, "No Rooms", &[]);
    let lonely = create_course(&mut stdin, &mut reader, empty_dept, "XX101");
    enroll_new_students(&mut stdin, &mut reader, lonely, "X", 2);

    let cases = [
        (dept, "2025-01-04", "2025-01-04", json!(["Final"]), "no_valid_days"),
        (dept, "2025-01-10", "2025-01-06", json!(["Final"]), "invalid_date_range"),
        (dept, MONDAY, MONDAY, json!([]), "no_exam_types"),
        (empty_dept, MONDAY, MONDAY, json!(["Final"]), "no_classrooms"),
        (424242, MONDAY, MONDAY, json!(["Final"]), "unknown_department"),
    ];
    for (i, (department_id, start, end, types, code)) in cases.into_iter().enumerate() {
        let summary = request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "schedule.generate",
            json!({
                "departmentId": department_id,
                "startDate": start,
                "endDate": end,
                "examTypes": types
            }),
        );
        assert_eq!(summary["success"], false, "{}", code);
        assert_eq!(summary["scheduledCount"], 0, "{}", code);
        assert_eq!(summary["errorCode"], code);
        assert_eq!(summary["errors"].as_array().map(|e| e.len()), Some(1));
    }
}

#[test]
fn messages_are_truncated_with_totals() {
    let workspace = temp_dir("examd-schedule-truncate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let (dept, _) = create_department(&mut stdin, &mut reader, "CE", &[("A101", 40, 5, 8)]);
    let shared = {
        let c = create_course(&mut stdin, &mut reader, dept, "CS100");
        enroll_new_students(&mut stdin, &mut reader, c, "S", 2)
    };
    // Every course shares both students, so only one fits per slot.
    for i in 1..=5 {
        let c = create_course(&mut stdin, &mut reader, dept, &format!("CS10{}", i));
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "e",
            "enrollments.bulkAdd",
            json!({ "courseId": c, "studentIds": shared }),
        );
    }

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schedule.generate",
        json!({
            "departmentId": dept,
            "startDate": MONDAY,
            "endDate": MONDAY,
            "examTypes": ["Final"],
            "constraints": { "timeSlots": ["09:00", "13:00"], "maxMessages": 2, "generateSeating": false }
        }),
    );
    assert_eq!(summary["success"], true);
    assert_eq!(summary["scheduledCount"], 2);
    assert_eq!(summary["unscheduledCount"], 4);
    assert_eq!(summary["errorsTotal"], 4);
    assert_eq!(summary["errors"].as_array().map(|e| e.len()), Some(2));
    assert_eq!(summary["seatedCount"], 0);
}

#[test]
fn async_generation_reports_through_job_status() {
    let workspace = temp_dir("examd-schedule-async");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let (dept, _) = create_department(&mut stdin, &mut reader, "CE", &[("A101", 40, 5, 8)]);
    let course = create_course(&mut stdin, &mut reader, dept, "CS101");
    enroll_new_students(&mut stdin, &mut reader, course, "A", 10);

    let started = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schedule.generateAsync",
        json!({
            "departmentId": dept,
            "startDate": MONDAY,
            "endDate": "2025-01-10",
            "examTypes": ["Midterm", "Final"],
            "constraints": { "seatingSeed": 5 }
        }),
    );
    let job_id = started["jobId"].as_str().expect("jobId").to_string();

    let deadline = Instant::now() + Duration::from_secs(30);
    let job = loop {
        let job = request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "schedule.jobStatus",
            json!({ "jobId": job_id }),
        );
        if job["status"] != "running" {
            break job;
        }
        assert!(Instant::now() < deadline, "job did not finish");
        std::thread::sleep(Duration::from_millis(20));
    };
    assert_eq!(job["status"], "completed");
    assert_eq!(job["result"]["scheduledCount"], 2);
    assert_eq!(job["result"]["seatedCount"], 20);

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.list",
        json!({ "departmentId": dept }),
    );
    assert_eq!(list["exams"].as_array().expect("exams").len(), 2);

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "4",
            "schedule.jobStatus",
            json!({ "jobId": "no-such-job" })
        ),
        "not_found"
    );
}
