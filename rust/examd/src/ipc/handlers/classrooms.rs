use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::{load_section, SetupSection};
use crate::ipc::helpers::{bad_params, db_conn, opt_str, required_i64};
use crate::ipc::types::{AppState, Request};
use crate::model::Classroom;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Map, Value};

const CLASSROOM_SELECT: &str =
    "SELECT id, department_id, code, name, capacity, rows_count, cols_count, seating_type
     FROM classrooms";

fn classroom_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Classroom> {
    Ok(Classroom {
        id: r.get(0)?,
        department_id: r.get(1)?,
        code: r.get(2)?,
        name: r.get(3)?,
        capacity: r.get(4)?,
        rows_count: r.get(5)?,
        cols_count: r.get(6)?,
        seating_type: r.get(7)?,
    })
}

fn load_classroom(
    conn: &Connection,
    classroom_id: i64,
    department_id: i64,
) -> rusqlite::Result<Option<Classroom>> {
    conn.query_row(
        &format!("{CLASSROOM_SELECT} WHERE id = ? AND department_id = ?"),
        (classroom_id, department_id),
        classroom_from_row,
    )
    .optional()
}

fn code_taken(
    conn: &Connection,
    department_id: i64,
    code: &str,
    except_id: Option<i64>,
) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM classrooms WHERE department_id = ? AND code = ? AND id != ?",
            (department_id, code, except_id.unwrap_or(-1)),
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn positive_dimension(v: &Value, key: &str) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(1..=10_000).contains(&n) {
        return Err(format!("{} must be in 1..=10000", key));
    }
    Ok(n)
}

fn text_field(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v
        .as_str()
        .ok_or_else(|| format!("{} must be string", key))?
        .trim()
        .to_string();
    if s.is_empty() || s.chars().count() > max_len {
        return Err(format!("{} must be 1..={} characters", key, max_len));
    }
    Ok(s)
}

/// Applies a create/update payload onto `room`. Unknown fields are rejected.
fn apply_classroom_patch(room: &mut Classroom, patch: &Map<String, Value>) -> Result<(), String> {
    for (k, v) in patch {
        match k.as_str() {
            "code" => room.code = text_field(v, k, 32)?,
            "name" => room.name = text_field(v, k, 128)?,
            "capacity" => room.capacity = positive_dimension(v, k)?,
            "rows" => room.rows_count = positive_dimension(v, k)?,
            "cols" => room.cols_count = positive_dimension(v, k)?,
            "seatingType" => room.seating_type = text_field(v, k, 32)?,
            _ => return Err(format!("unknown classroom field: {}", k)),
        }
    }
    Ok(())
}

fn handle_classrooms_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let department_id = match required_i64(req, "departmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let search = match opt_str(req, "search") {
        Ok(v) => v.map(|s| s.to_lowercase()),
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(&format!(
        "{CLASSROOM_SELECT} WHERE department_id = ? ORDER BY code"
    )) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([department_id], classroom_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(rooms) => {
            let rooms: Vec<Classroom> = rooms
                .into_iter()
                .filter(|r| match &search {
                    Some(q) => {
                        r.code.to_lowercase().contains(q) || r.name.to_lowercase().contains(q)
                    }
                    None => true,
                })
                .collect();
            ok(&req.id, json!({ "classrooms": rooms }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classrooms_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let classroom_id = match required_i64(req, "classroomId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let department_id = match required_i64(req, "departmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match load_classroom(conn, classroom_id, department_id) {
        Ok(Some(room)) => ok(&req.id, json!({ "classroom": room })),
        Ok(None) => err(&req.id, "not_found", "classroom not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classrooms_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let department_id = match required_i64(req, "departmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(input) = req.params.get("input").and_then(|v| v.as_object()) else {
        return bad_params(req, "input must be an object");
    };
    for key in ["code", "name", "capacity", "rows", "cols"] {
        if !input.contains_key(key) {
            return bad_params(req, format!("missing input.{}", key));
        }
    }
    let default_seating = match load_section(conn, SetupSection::Seating) {
        Ok(v) => v
            .get("defaultSeatingType")
            .and_then(|s| s.as_str())
            .unwrap_or("single")
            .to_string(),
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
    };
    let mut room = Classroom {
        id: 0,
        department_id,
        code: String::new(),
        name: String::new(),
        capacity: 0,
        rows_count: 0,
        cols_count: 0,
        seating_type: default_seating,
    };
    if let Err(msg) = apply_classroom_patch(&mut room, input) {
        return bad_params(req, msg);
    }

    let dept: Result<Option<i64>, _> = conn
        .query_row("SELECT id FROM departments WHERE id = ?", [department_id], |r| r.get(0))
        .optional();
    match dept {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "department not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match code_taken(conn, department_id, &room.code, None) {
        Ok(false) => {}
        Ok(true) => {
            return err(
                &req.id,
                "duplicate",
                format!("classroom code already used in this department: {}", room.code),
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = conn.execute(
        "INSERT INTO classrooms(department_id, code, name, capacity, rows_count, cols_count, seating_type)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            department_id,
            &room.code,
            &room.name,
            room.capacity,
            room.rows_count,
            room.cols_count,
            &room.seating_type,
        ),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    room.id = conn.last_insert_rowid();
    if room.capacity > room.rows_count * room.cols_count {
        log::warn!(
            "classroom {} seats {} but its grid holds {}",
            room.code,
            room.capacity,
            room.rows_count * room.cols_count
        );
    }
    ok(&req.id, json!({ "classroomId": room.id, "classroom": room }))
}

fn handle_classrooms_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let classroom_id = match required_i64(req, "classroomId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let department_id = match required_i64(req, "departmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return bad_params(req, "patch must be an object");
    };
    let mut room = match load_classroom(conn, classroom_id, department_id) {
        Ok(Some(r)) => r,
        Ok(None) => return err(&req.id, "not_found", "classroom not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = apply_classroom_patch(&mut room, patch) {
        return bad_params(req, msg);
    }
    match code_taken(conn, department_id, &room.code, Some(classroom_id)) {
        Ok(false) => {}
        Ok(true) => {
            return err(
                &req.id,
                "duplicate",
                format!("classroom code already used in this department: {}", room.code),
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    if let Err(e) = conn.execute(
        "UPDATE classrooms
         SET code = ?, name = ?, capacity = ?, rows_count = ?, cols_count = ?, seating_type = ?
         WHERE id = ? AND department_id = ?",
        (
            &room.code,
            &room.name,
            room.capacity,
            room.rows_count,
            room.cols_count,
            &room.seating_type,
            classroom_id,
            department_id,
        ),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "classroom": room }))
}

fn handle_classrooms_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let classroom_id = match required_i64(req, "classroomId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let department_id = match required_i64(req, "departmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let room = match load_classroom(conn, classroom_id, department_id) {
        Ok(Some(r)) => r,
        Ok(None) => return err(&req.id, "not_found", "classroom not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let used: rusqlite::Result<i64> = conn.query_row(
        "SELECT COUNT(*) FROM exam_assignments WHERE classroom_id = ?",
        [classroom_id],
        |r| r.get(0),
    );
    match used {
        Ok(0) => {}
        Ok(n) => {
            return err(
                &req.id,
                "in_use",
                format!("classroom {} is assigned to {} scheduled exam(s)", room.code, n),
                Some(json!({ "examCount": n })),
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    if let Err(e) = conn.execute(
        "DELETE FROM classrooms WHERE id = ? AND department_id = ?",
        (classroom_id, department_id),
    ) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classrooms.list" => Some(handle_classrooms_list(state, req)),
        "classrooms.get" => Some(handle_classrooms_get(state, req)),
        "classrooms.create" => Some(handle_classrooms_create(state, req)),
        "classrooms.update" => Some(handle_classrooms_update(state, req)),
        "classrooms.delete" => Some(handle_classrooms_delete(state, req)),
        _ => None,
    }
}
