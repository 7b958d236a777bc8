mod test_support;

use serde_json::json;
use test_support::{
    create_department, id_field, request_err, request_ok, select_workspace, spawn_sidecar,
    temp_dir,
};

#[test]
fn departments_instructors_and_courses_dedupe() {
    let workspace = temp_dir("examd-catalog");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let (department_id, _) = create_department(&mut stdin, &mut reader, "Computer Engineering", &[]);
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "1",
            "departments.create",
            json!({ "name": "Computer Engineering" })
        ),
        "duplicate"
    );
    let (other_id, _) = create_department(&mut stdin, &mut reader, "Electrical Engineering", &[]);

    let i1 = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "instructors.create",
        json!({ "fullName": "Ada Lovelace" }),
    );
    assert_eq!(i1["existing"], false);
    let i2 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "instructors.create",
        json!({ "fullName": "Ada Lovelace" }),
    );
    assert_eq!(i2["existing"], true);
    assert_eq!(i1["instructorId"], i2["instructorId"]);

    let c1 = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "courses.create",
        json!({
            "departmentId": department_id,
            "code": "BLM201",
            "name": "Data Structures",
            "instructorId": id_field(&i1, "instructorId")
        }),
    );
    assert_eq!(c1["existing"], false);
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "courses.create",
        json!({ "departmentId": department_id, "code": "BLM201", "name": "Other Name" }),
    );
    assert_eq!(again["existing"], true);
    assert_eq!(again["courseId"], c1["courseId"]);

    // Same code in another department is a different course.
    let other = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "courses.create",
        json!({ "departmentId": other_id, "code": "BLM201", "name": "Data Structures" }),
    );
    assert_eq!(other["existing"], false);
    assert_ne!(other["courseId"], c1["courseId"]);

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "7",
            "courses.create",
            json!({ "departmentId": department_id, "code": "CS", "name": "Too short" })
        ),
        "bad_params"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "8",
            "courses.create",
            json!({ "departmentId": 9999, "code": "BLM101", "name": "Orphan" })
        ),
        "not_found"
    );

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "courses.list",
        json!({ "departmentId": department_id }),
    );
    let courses = list["courses"].as_array().expect("courses");
    assert_eq!(courses.len(), 1);
    assert_eq!(courses[0]["classLevel"], 2);
    assert_eq!(courses[0]["studentCount"], 0);

    let departments = request_ok(&mut stdin, &mut reader, "10", "departments.list", json!({}));
    assert_eq!(departments["departments"].as_array().expect("list").len(), 2);
}

#[test]
fn enrollments_are_idempotent_and_counted() {
    let workspace = temp_dir("examd-enrollments");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    let (department_id, _) = create_department(&mut stdin, &mut reader, "Mathematics", &[]);
    let course_id = test_support::create_course(&mut stdin, &mut reader, department_id, "MAT101");

    let s1 = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({ "studentNo": "2023001", "fullName": "Grace Hopper", "classLevel": 1 }),
    );
    let dup = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "studentNo": "2023001", "fullName": "Someone Else" }),
    );
    assert_eq!(dup["existing"], true);
    assert_eq!(dup["studentId"], s1["studentId"]);
    let s2 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "studentNo": "2023002", "fullName": "Alan Turing" }),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "enrollments.add",
        json!({ "studentId": s1["studentId"], "courseId": course_id }),
    );
    assert_eq!(first["added"], true);
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "enrollments.add",
        json!({ "studentId": s1["studentId"], "courseId": course_id }),
    );
    assert_eq!(second["added"], false);

    let bulk = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "enrollments.bulkAdd",
        json!({ "courseId": course_id, "studentIds": [s1["studentId"], s2["studentId"]] }),
    );
    assert_eq!(bulk["added"], 1);
    assert_eq!(bulk["requested"], 2);

    // An unknown student aborts the whole batch.
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "7",
            "enrollments.bulkAdd",
            json!({ "courseId": course_id, "studentIds": [s2["studentId"], 424242] })
        ),
        "not_found"
    );

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "courses.list",
        json!({ "departmentId": department_id }),
    );
    assert_eq!(list["courses"][0]["studentCount"], 2);

    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "courses.students",
        json!({ "courseId": course_id, "search": "turing" }),
    );
    let roster = roster["students"].as_array().expect("students");
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0]["studentNo"], "2023002");
}

#[test]
fn sanitize_drops_header_rows_and_relabels_levels() {
    let workspace = temp_dir("examd-sanitize");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    let (department_id, _) = create_department(&mut stdin, &mut reader, "Physics", &[]);
    let real = test_support::create_course(&mut stdin, &mut reader, department_id, "FIZ301");

    // Imported rows bypass the create-time checks.
    {
        let conn = rusqlite::Connection::open(workspace.join("examd.sqlite3")).expect("open db");
        for (code, name, level) in [
            ("DERS KODU", "DERSİN ADI", 0),
            ("1. Sınıf", "Güz Dönemi", 0),
            ("FIZ102", "nan", 0),
        ] {
            conn.execute(
                "INSERT INTO courses(department_id, code, name, class_level) VALUES(?, ?, ?, ?)",
                (department_id, code, name, level),
            )
            .expect("insert placeholder");
        }
        conn.execute("UPDATE courses SET class_level = 0 WHERE id = ?", [real])
            .expect("reset level");
    }

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "courses.sanitize",
        json!({ "departmentId": department_id }),
    );
    assert_eq!(result["deleted"], 3);
    assert_eq!(result["updated"], 1);

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.list",
        json!({ "departmentId": department_id }),
    );
    let courses = list["courses"].as_array().expect("courses");
    assert_eq!(courses.len(), 1);
    assert_eq!(courses[0]["code"], "FIZ301");
    assert_eq!(courses[0]["classLevel"], 3);
}
