use crate::ipc::error::{err, ok};
use crate::ipc::handlers::schedule::seeded_rng;
use crate::ipc::handlers::setup::{load_section, SetupSection};
use crate::ipc::helpers::{db_conn, opt_i64, opt_u64, required_i64};
use crate::ipc::types::{AppState, Request};
use crate::seating::plan_department_seating;
use crate::store::SqliteStore;
use serde_json::json;

fn handle_seating_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let department_id = match required_i64(req, "departmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let seed = match opt_u64(req, "seed") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let seed = match seed {
        Some(s) => Some(s),
        None => match load_section(conn, SetupSection::Seating) {
            Ok(v) => v.get("fixedSeed").and_then(|s| s.as_u64()),
            Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
        },
    };
    let Some(_claim) = state.jobs.claim_department(department_id) else {
        return err(
            &req.id,
            "busy",
            format!("a schedule run for department {} is already in progress", department_id),
            None,
        );
    };

    let mut rng = seeded_rng(seed);
    let report = plan_department_seating(&SqliteStore::new(conn), department_id, &mut rng);
    ok(&req.id, json!(report))
}

fn handle_seating_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let exam_id = match required_i64(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let classroom_id = match opt_i64(req, "classroomId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match SqliteStore::new(conn).seating_plan(exam_id, classroom_id) {
        Ok(seats) => ok(&req.id, json!({ "seats": seats })),
        Err(e) => err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
}

fn handle_seating_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let department_id = match required_i64(req, "departmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match SqliteStore::new(conn).clear_department_seating(department_id) {
        Ok(n) => ok(&req.id, json!({ "deleted": n })),
        Err(e) => err(&req.id, "db_delete_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "seating.generate" => Some(handle_seating_generate(state, req)),
        "seating.get" => Some(handle_seating_get(state, req)),
        "seating.clear" => Some(handle_seating_clear(state, req)),
        _ => None,
    }
}
