use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    bad_params, db_conn, i64_array, opt_i64, opt_str, required_i64, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{ScheduleStore, SqliteStore};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

/// Header and group rows that spreadsheet imports leave behind as courses.
const PLACEHOLDER_LABELS: &[&str] = &["DERS KODU", "NAN", "COURSE CODE"];
const PLACEHOLDER_PREFIXES: &[&str] = &["SEÇMELİ DERS", "ZORUNLU DERS", "ELECTIVE COURSES"];

pub fn is_placeholder_course(code: &str, name: &str) -> bool {
    let code = code.trim();
    let name = name.trim();
    if code.chars().count() < 3 || name.chars().count() < 3 {
        return true;
    }
    let code_up = code.to_uppercase();
    let name_up = name.to_uppercase();
    if PLACEHOLDER_LABELS.contains(&code_up.as_str()) || PLACEHOLDER_LABELS.contains(&name_up.as_str())
    {
        return true;
    }
    if code_up.contains("SINIF") {
        return true;
    }
    PLACEHOLDER_PREFIXES
        .iter()
        .any(|p| code_up.starts_with(p) || name_up.starts_with(p))
}

/// Class level taken from the first digit of the course code.
pub fn class_level_from_code(code: &str) -> Option<i64> {
    code.chars()
        .find(|c| c.is_ascii_digit())
        .and_then(|c| c.to_digit(10))
        .map(i64::from)
}

fn department_exists(conn: &Connection, department_id: i64) -> anyhow::Result<bool> {
    SqliteStore::new(conn).department_exists(department_id)
}

fn handle_departments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT d.id, d.name,
                (SELECT COUNT(*) FROM courses c WHERE c.department_id = d.id),
                (SELECT COUNT(*) FROM classrooms cl WHERE cl.department_id = d.id)
         FROM departments d
         ORDER BY d.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "name": r.get::<_, String>(1)?,
                "courseCount": r.get::<_, i64>(2)?,
                "classroomCount": r.get::<_, i64>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(departments) => ok(&req.id, json!({ "departments": departments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_departments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let existing: Option<i64> = match conn
        .query_row("SELECT id FROM departments WHERE name = ?", [&name], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Some(id) = existing {
        return err(
            &req.id,
            "duplicate",
            format!("department already exists: {}", name),
            Some(json!({ "departmentId": id })),
        );
    }
    if let Err(e) = conn.execute("INSERT INTO departments(name) VALUES(?)", [&name]) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "departmentId": conn.last_insert_rowid(), "name": name }),
    )
}

fn handle_instructors_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let full_name = match required_str(req, "fullName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let existing: Option<i64> = match conn
        .query_row(
            "SELECT id FROM instructors WHERE full_name = ?",
            [&full_name],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Some(id) = existing {
        return ok(&req.id, json!({ "instructorId": id, "existing": true }));
    }
    if let Err(e) = conn.execute("INSERT INTO instructors(full_name) VALUES(?)", [&full_name]) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "instructorId": conn.last_insert_rowid(), "existing": false }),
    )
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let department_id = match required_i64(req, "departmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match SqliteStore::new(conn).fetch_courses_with_enrollment_counts(department_id) {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let department_id = match required_i64(req, "departmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let code = match required_str(req, "code") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_level = match opt_i64(req, "classLevel") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let instructor_id = match opt_i64(req, "instructorId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if code.chars().count() < 3 || name.chars().count() < 3 {
        return bad_params(req, "course code and name must be at least 3 characters");
    }
    let class_level = class_level
        .or_else(|| class_level_from_code(&code))
        .unwrap_or(0);
    if !(0..=9).contains(&class_level) {
        return bad_params(req, "classLevel must be in 0..=9");
    }

    match department_exists(conn, department_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "department not found", None),
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
    if let Some(iid) = instructor_id {
        let found: Result<Option<i64>, _> = conn
            .query_row("SELECT id FROM instructors WHERE id = ?", [iid], |r| r.get(0))
            .optional();
        match found {
            Ok(Some(_)) => {}
            Ok(None) => return err(&req.id, "not_found", "instructor not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let existing: Option<i64> = match conn
        .query_row(
            "SELECT id FROM courses WHERE department_id = ? AND code = ?",
            (department_id, &code),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Some(id) = existing {
        return ok(&req.id, json!({ "courseId": id, "existing": true }));
    }

    if let Err(e) = conn.execute(
        "INSERT INTO courses(department_id, instructor_id, code, name, class_level)
         VALUES(?, ?, ?, ?, ?)",
        (department_id, instructor_id, &code, &name, class_level),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "courseId": conn.last_insert_rowid(), "existing": false }),
    )
}

fn sanitize_department_courses(
    conn: &Connection,
    department_id: i64,
) -> anyhow::Result<(usize, usize, Vec<String>)> {
    let courses = SqliteStore::new(conn).fetch_courses_with_enrollment_counts(department_id)?;
    let tx = conn.unchecked_transaction()?;
    let mut deleted = 0usize;
    let mut updated = 0usize;
    let mut kept_scheduled = Vec::new();

    for course in &courses {
        if is_placeholder_course(&course.code, &course.name) {
            let exams: i64 = tx.query_row(
                "SELECT COUNT(*) FROM exams WHERE course_id = ?",
                [course.id],
                |r| r.get(0),
            )?;
            if exams > 0 {
                kept_scheduled.push(course.code.clone());
                continue;
            }
            tx.execute("DELETE FROM enrollments WHERE course_id = ?", [course.id])?;
            tx.execute("DELETE FROM courses WHERE id = ?", [course.id])?;
            deleted += 1;
            continue;
        }
        if let Some(level) = class_level_from_code(&course.code) {
            if level != course.class_level {
                tx.execute(
                    "UPDATE courses SET class_level = ? WHERE id = ?",
                    (level, course.id),
                )?;
                updated += 1;
            }
        }
    }
    tx.commit()?;
    Ok((deleted, updated, kept_scheduled))
}

fn handle_courses_sanitize(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let department_id = match required_i64(req, "departmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match sanitize_department_courses(conn, department_id) {
        Ok((deleted, updated, kept_scheduled)) => {
            log::info!(
                "department {department_id}: sanitized courses ({deleted} deleted, {updated} relabelled)"
            );
            ok(
                &req.id,
                json!({
                    "deleted": deleted,
                    "updated": updated,
                    "keptScheduled": kept_scheduled,
                }),
            )
        }
        Err(e) => err(&req.id, "db_tx_failed", format!("{e:#}"), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_no = match required_str(req, "studentNo") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let full_name = match required_str(req, "fullName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_level = match opt_i64(req, "classLevel") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let existing: Option<i64> = match conn
        .query_row(
            "SELECT id FROM students WHERE student_no = ?",
            [&student_no],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Some(id) = existing {
        return ok(&req.id, json!({ "studentId": id, "existing": true }));
    }
    if let Err(e) = conn.execute(
        "INSERT INTO students(student_no, full_name, class_level) VALUES(?, ?, ?)",
        (&student_no, &full_name, class_level),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "studentId": conn.last_insert_rowid(), "existing": false }),
    )
}

fn row_exists(conn: &Connection, sql: &str, id: i64) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn.query_row(sql, [id], |r| r.get(0)).optional()?;
    Ok(found.is_some())
}

fn handle_enrollments_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_i64(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_i64(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    for (sql, what, id) in [
        ("SELECT id FROM students WHERE id = ?", "student", student_id),
        ("SELECT id FROM courses WHERE id = ?", "course", course_id),
    ] {
        match row_exists(conn, sql, id) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", format!("{} not found", what), None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    match conn.execute(
        "INSERT OR IGNORE INTO enrollments(student_id, course_id) VALUES(?, ?)",
        (student_id, course_id),
    ) {
        Ok(n) => ok(&req.id, json!({ "added": n > 0 })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_enrollments_bulk_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_i64(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_ids = match i64_array(req, "studentIds") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match row_exists(conn, "SELECT id FROM courses WHERE id = ?", course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let mut added = 0usize;
    for sid in &student_ids {
        match row_exists(&tx, "SELECT id FROM students WHERE id = ?", *sid) {
            Ok(true) => {}
            Ok(false) => {
                return err(
                    &req.id,
                    "not_found",
                    format!("student not found: {}", sid),
                    Some(json!({ "studentId": sid })),
                )
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
        match tx.execute(
            "INSERT OR IGNORE INTO enrollments(student_id, course_id) VALUES(?, ?)",
            (sid, course_id),
        ) {
            Ok(n) => added += n,
            Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "added": added, "requested": student_ids.len() }),
    )
}

fn handle_courses_students(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_i64(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let search = match opt_str(req, "search") {
        Ok(v) => v.map(|s| s.to_lowercase()),
        Err(e) => return e,
    };
    match SqliteStore::new(conn).fetch_course_students(course_id) {
        Ok(students) => {
            let students: Vec<_> = students
                .into_iter()
                .filter(|s| match &search {
                    Some(q) => {
                        s.student_no.to_lowercase().contains(q)
                            || s.full_name.to_lowercase().contains(q)
                    }
                    None => true,
                })
                .collect();
            ok(&req.id, json!({ "students": students }))
        }
        Err(e) => err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "departments.list" => Some(handle_departments_list(state, req)),
        "departments.create" => Some(handle_departments_create(state, req)),
        "instructors.create" => Some(handle_instructors_create(state, req)),
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.sanitize" => Some(handle_courses_sanitize(state, req)),
        "courses.students" => Some(handle_courses_students(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "enrollments.add" => Some(handle_enrollments_add(state, req)),
        "enrollments.bulkAdd" => Some(handle_enrollments_bulk_add(state, req)),
        _ => None,
    }
}
