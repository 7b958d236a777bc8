use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::{load_section, SetupSection};
use crate::ipc::helpers::{
    bad_params, db_conn, opt_i64, required_date, required_i64, required_str, string_array,
};
use crate::ipc::types::{AppState, Request};
use crate::jobs::{JobTracker, LogLevel};
use crate::scheduler::{self, ExamScheduler, GenerateRequest, ScheduleConstraints, ScheduleSummary};
use crate::store::SqliteStore;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use uuid::Uuid;

/// Built-in defaults, then the workspace's saved scheduling setup, then the
/// request's own `constraints` object.
fn resolve_constraints(
    conn: &Connection,
    raw: Option<&Value>,
) -> Result<ScheduleConstraints, String> {
    let mut merged = load_section(conn, SetupSection::Scheduling).map_err(|e| format!("{e:#}"))?;
    if let Some(raw) = raw.filter(|v| !v.is_null()) {
        let overlay = raw
            .as_object()
            .ok_or_else(|| "constraints must be an object".to_string())?;
        let target = merged
            .as_object_mut()
            .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
        for (k, v) in overlay {
            target.insert(k.clone(), v.clone());
        }
    }
    let mut constraints: ScheduleConstraints =
        serde_json::from_value(merged).map_err(|e| format!("invalid constraints: {e}"))?;

    if constraints.seating_seed.is_none() {
        constraints.seating_seed = load_section(conn, SetupSection::Seating)
            .map_err(|e| format!("{e:#}"))?
            .get("fixedSeed")
            .and_then(|v| v.as_u64());
    }
    Ok(constraints)
}

fn parse_generate_request(conn: &Connection, req: &Request) -> Result<GenerateRequest, Value> {
    let department_id = required_i64(req, "departmentId")?;
    let start_date = required_date(req, "startDate")?;
    let end_date = required_date(req, "endDate")?;
    let exam_types = string_array(req, "examTypes")?;
    let constraints = resolve_constraints(conn, req.params.get("constraints"))
        .map_err(|msg| bad_params(req, msg))?;
    Ok(GenerateRequest {
        department_id,
        start_date,
        end_date,
        exam_types,
        constraints,
    })
}

pub fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_os_rng(),
    }
}

/// One complete run against `conn`, recorded in the run history.
fn run_schedule(conn: &Connection, request: &GenerateRequest, run_id: &str) -> ScheduleSummary {
    let store = SqliteStore::new(conn);
    if let Err(e) = store.record_run_started(run_id, request.department_id) {
        log::warn!("run {run_id}: could not record start: {e:#}");
    }
    let mut rng = seeded_rng(request.constraints.seating_seed);
    let summary = ExamScheduler::new(&store).generate(request, run_id, &mut rng);
    if let Err(e) = store.record_run_finished(run_id, &summary) {
        log::warn!("run {run_id}: could not record outcome: {e:#}");
    }
    summary
}

fn busy(req: &Request, department_id: i64) -> Value {
    err(
        &req.id,
        "busy",
        format!("a schedule run for department {} is already in progress", department_id),
        Some(json!({ "departmentId": department_id })),
    )
}

fn handle_schedule_generate(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let request = match parse_generate_request(conn, req) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let Some(_claim) = state.jobs.claim_department(request.department_id) else {
        return busy(req, request.department_id);
    };
    let run_id = Uuid::new_v4().to_string();
    let summary = run_schedule(conn, &request, &run_id);
    ok(&req.id, json!(summary))
}

fn run_in_background(
    tracker: JobTracker,
    job_id: String,
    workspace: std::path::PathBuf,
    request: GenerateRequest,
    claim: crate::jobs::DepartmentClaim,
) {
    tracker.log(
        &job_id,
        LogLevel::Info,
        format!("scheduling department {}", claim.department_id()),
    );
    let conn = match db::open_db(&workspace) {
        Ok(c) => c,
        Err(e) => {
            tracker.fail_job(&job_id, format!("failed to open workspace: {e:#}"));
            return;
        }
    };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_schedule(&conn, &request, &job_id)));
    record_outcome(&tracker, &job_id, outcome);
    drop(claim);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Moves a job out of `running` whatever way the worker ended.
fn record_outcome(tracker: &JobTracker, job_id: &str, outcome: std::thread::Result<ScheduleSummary>) {
    let summary = match outcome {
        Ok(s) => s,
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            log::error!("job {job_id}: scheduling run panicked: {msg}");
            tracker.fail_job(job_id, format!("scheduling run panicked: {msg}"));
            return;
        }
    };
    let level = if summary.success {
        LogLevel::Info
    } else {
        LogLevel::Warning
    };
    tracker.log(job_id, level, summary.message.clone());
    match serde_json::to_value(&summary) {
        Ok(v) if summary.success => tracker.complete_job(job_id, v),
        Ok(_) => tracker.fail_job(job_id, summary.message.clone()),
        Err(e) => tracker.fail_job(job_id, e.to_string()),
    }
}

fn handle_schedule_generate_async(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let request = match parse_generate_request(conn, req) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let Some(claim) = state.jobs.claim_department(request.department_id) else {
        return busy(req, request.department_id);
    };
    let job_id = state.jobs.create_job(request.department_id);
    let tracker = state.jobs.clone();
    let thread_job_id = job_id.clone();
    let spawned = std::thread::Builder::new()
        .name(format!("schedule-{}", request.department_id))
        .spawn(move || run_in_background(tracker, thread_job_id, workspace, request, claim));
    if let Err(e) = spawned {
        state.jobs.fail_job(&job_id, e.to_string());
        return err(&req.id, "spawn_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "jobId": job_id }))
}

fn handle_schedule_job_status(state: &mut AppState, req: &Request) -> Value {
    let job_id = match required_str(req, "jobId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match state.jobs.get_job(&job_id) {
        Some(job) => ok(&req.id, json!(job)),
        None => err(&req.id, "not_found", "job not found", None),
    }
}

fn handle_schedule_clear(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let department_id = match required_i64(req, "departmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(_claim) = state.jobs.claim_department(department_id) else {
        return busy(req, department_id);
    };
    let cleared = scheduler::clear(&SqliteStore::new(conn), department_id);
    if !cleared {
        return err(&req.id, "db_delete_failed", "failed to clear the schedule", None);
    }
    ok(&req.id, json!({ "cleared": true }))
}

fn handle_schedule_list(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let department_id = match required_i64(req, "departmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match SqliteStore::new(conn).scheduled_exams(department_id) {
        Ok(exams) => ok(&req.id, json!({ "exams": exams })),
        Err(e) => err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
}

fn handle_schedule_classroom_load(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let department_id = match required_i64(req, "departmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match SqliteStore::new(conn).classroom_load(department_id) {
        Ok(rows) => ok(&req.id, json!({ "rows": rows })),
        Err(e) => err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
}

fn handle_schedule_runs(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let department_id = match required_i64(req, "departmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let limit = match opt_i64(req, "limit") {
        Ok(v) => v.unwrap_or(20),
        Err(e) => return e,
    };
    if !(1..=200).contains(&limit) {
        return bad_params(req, "limit must be in 1..=200");
    }
    match SqliteStore::new(conn).list_runs(department_id, limit) {
        Ok(runs) => ok(&req.id, json!({ "runs": runs })),
        Err(e) => err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "schedule.generate" => Some(handle_schedule_generate(state, req)),
        "schedule.generateAsync" => Some(handle_schedule_generate_async(state, req)),
        "schedule.jobStatus" => Some(handle_schedule_job_status(state, req)),
        "schedule.clear" => Some(handle_schedule_clear(state, req)),
        "schedule.list" => Some(handle_schedule_list(state, req)),
        "schedule.classroomLoad" => Some(handle_schedule_classroom_load(state, req)),
        "schedule.runs" => Some(handle_schedule_runs(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_constraints_override_saved_setup() {
        let conn = db::open_in_memory();
        db::settings_set_json(
            &conn,
            "setup.scheduling",
            &json!({ "waitingTimeMinutes": 30, "maxMessages": 5 }),
        )
        .expect("save");
        let c = resolve_constraints(&conn, Some(&json!({ "maxMessages": 7 }))).expect("resolve");
        assert_eq!(c.waiting_time_minutes, 30);
        assert_eq!(c.max_messages, 7);
        assert_eq!(c.default_duration_minutes, 120);
        assert!(c.seating_seed.is_none());
    }

    #[test]
    fn fixed_seed_from_seating_setup_applies() {
        let conn = db::open_in_memory();
        db::settings_set_json(&conn, "setup.seating", &json!({ "fixedSeed": 77 }))
            .expect("save");
        let c = resolve_constraints(&conn, None).expect("resolve");
        assert_eq!(c.seating_seed, Some(77));
        let c = resolve_constraints(&conn, Some(&json!({ "seatingSeed": 3 }))).expect("resolve");
        assert_eq!(c.seating_seed, Some(3));
    }

    #[test]
    fn unknown_constraint_is_a_parameter_error() {
        let conn = db::open_in_memory();
        assert!(resolve_constraints(&conn, Some(&json!({ "lunchBreak": true }))).is_err());
        assert!(resolve_constraints(&conn, Some(&json!([1, 2]))).is_err());
    }

    #[test]
    fn panicking_run_marks_the_job_failed() {
        let tracker = JobTracker::new();
        let job_id = tracker.create_job(1);
        let outcome = panic::catch_unwind(|| -> ScheduleSummary { panic!("slot grid exploded") });
        record_outcome(&tracker, &job_id, outcome);

        let job = tracker.get_job(&job_id).expect("job");
        assert_eq!(job.status, crate::jobs::JobStatus::Failed);
        assert!(job.completed_at.is_some());
        assert!(job
            .logs
            .iter()
            .any(|l| l.message.contains("slot grid exploded")));
    }
}
