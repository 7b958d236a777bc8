//! Greedy exam-slot assignment.
//!
//! # Algorithm
//!
//! 1. Validate the request (exam types, date range, qualifying days,
//!    classrooms) before touching storage.
//! 2. Purge the department's previous schedule.
//! 3. Load courses (class level, then code) and cache every roster once.
//! 4. For each exam type, for each course: take the first slot of the grid
//!    that passes the simultaneity policy, the hard student conflict and the
//!    waiting-time rule against everything placed so far.
//! 5. Create the exam, hand it to the classroom allocator and append it to
//!    the placed list.
//!
//! No backtracking: a course with no acceptable slot is reported and the run
//! moves on.

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, NaiveTime};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::allocator::allocate_classrooms;
use crate::conflicts::{ConflictIndex, PlacedExam};
use crate::model::{hhmm_list, Course};
use crate::seating::{plan_exam_seating, SeatingReport};
use crate::slots::{default_time_slots, Slot, SlotGrid};
use crate::store::ScheduleStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ScheduleError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn storage(what: &str, e: anyhow::Error) -> Self {
        Self::new("storage_failed", format!("{what}: {e:#}"))
    }
}

impl std::fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ScheduleError {}

fn default_duration() -> i64 {
    120
}

fn default_waiting_time() -> i64 {
    15
}

fn default_excluded_weekdays() -> Vec<u32> {
    vec![5, 6]
}

fn default_generate_seating() -> bool {
    true
}

fn default_max_messages() -> usize {
    20
}

/// Run-wide policy knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScheduleConstraints {
    #[serde(default = "default_duration")]
    pub default_duration_minutes: i64,
    /// 0 disables the rule.
    #[serde(default = "default_waiting_time")]
    pub waiting_time_minutes: i64,
    #[serde(default)]
    pub no_simultaneous_exams: bool,
    /// 0 = Monday .. 6 = Sunday.
    #[serde(default = "default_excluded_weekdays")]
    pub excluded_weekdays: Vec<u32>,
    #[serde(default = "default_time_slots", with = "hhmm_list")]
    pub time_slots: Vec<NaiveTime>,
    /// Restrict the run to these courses; `None` means every department course.
    #[serde(default)]
    pub course_ids: Option<Vec<i64>>,
    /// course id -> exam duration in minutes.
    #[serde(default)]
    pub custom_durations: HashMap<i64, i64>,
    #[serde(default = "default_generate_seating")]
    pub generate_seating: bool,
    #[serde(default)]
    pub seating_seed: Option<u64>,
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

impl Default for ScheduleConstraints {
    fn default() -> Self {
        Self {
            default_duration_minutes: default_duration(),
            waiting_time_minutes: default_waiting_time(),
            no_simultaneous_exams: false,
            excluded_weekdays: default_excluded_weekdays(),
            time_slots: default_time_slots(),
            course_ids: None,
            custom_durations: HashMap::new(),
            generate_seating: default_generate_seating(),
            seating_seed: None,
            max_messages: default_max_messages(),
        }
    }
}

impl ScheduleConstraints {
    pub fn duration_for(&self, course_id: i64) -> i64 {
        self.custom_durations
            .get(&course_id)
            .copied()
            .unwrap_or(self.default_duration_minutes)
    }
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub department_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub exam_types: Vec<String>,
    pub constraints: ScheduleConstraints,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSummary {
    pub success: bool,
    pub message: String,
    pub run_id: String,
    pub scheduled_count: usize,
    pub unscheduled_count: usize,
    pub seated_count: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub warnings_total: usize,
    pub errors_total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl ScheduleSummary {
    fn failed(run_id: &str, e: ScheduleError) -> Self {
        Self {
            success: false,
            message: e.message.clone(),
            run_id: run_id.to_string(),
            scheduled_count: 0,
            unscheduled_count: 0,
            seated_count: 0,
            warnings: Vec::new(),
            errors: vec![e.message],
            warnings_total: 0,
            errors_total: 1,
            error_code: Some(e.code),
        }
    }
}

/// Outcome of a run before the message lists are bounded for display.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub placed: Vec<PlacedExam>,
    pub unscheduled: Vec<(i64, String)>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub seating: SeatingReport,
}

impl RunOutcome {
    fn into_summary(self, run_id: &str, max_messages: usize) -> ScheduleSummary {
        let scheduled = self.placed.len();
        let unscheduled = self.unscheduled.len();
        let mut warnings = self.warnings;
        warnings.extend(self.seating.warnings);
        let mut errors = self.errors;
        errors.extend(self.seating.errors);

        let message = if unscheduled == 0 {
            format!("{scheduled} exam(s) scheduled")
        } else {
            format!("{scheduled} exam(s) scheduled, {unscheduled} could not be placed")
        };
        let warnings_total = warnings.len();
        let errors_total = errors.len();
        warnings.truncate(max_messages);
        errors.truncate(max_messages);

        ScheduleSummary {
            success: true,
            message,
            run_id: run_id.to_string(),
            scheduled_count: scheduled,
            unscheduled_count: unscheduled,
            seated_count: self.seating.seated,
            warnings,
            errors,
            warnings_total,
            errors_total,
            error_code: None,
        }
    }
}

/// Normalized exam type labels: trimmed, blanks dropped, first occurrence kept.
pub fn normalize_exam_types(raw: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

/// Configuration checks that must pass before anything is mutated.
pub fn validate_request<S: ScheduleStore + ?Sized>(
    store: &S,
    req: &GenerateRequest,
) -> Result<SlotGrid, ScheduleError> {
    if normalize_exam_types(&req.exam_types).is_empty() {
        return Err(ScheduleError::new(
            "no_exam_types",
            "select at least one exam type",
        ));
    }
    let c = &req.constraints;
    if c.default_duration_minutes <= 0 {
        return Err(ScheduleError::new(
            "bad_constraints",
            "defaultDurationMinutes must be positive",
        ));
    }
    if c.waiting_time_minutes < 0 {
        return Err(ScheduleError::new(
            "bad_constraints",
            "waitingTimeMinutes must not be negative",
        ));
    }
    if let Some((course_id, minutes)) = c.custom_durations.iter().find(|(_, m)| **m <= 0) {
        return Err(ScheduleError::new(
            "bad_constraints",
            format!("custom duration for course {course_id} must be positive (got {minutes})"),
        ));
    }

    let grid = SlotGrid::new(
        req.start_date,
        req.end_date,
        &c.excluded_weekdays,
        &c.time_slots,
    )?;

    let exists = store
        .department_exists(req.department_id)
        .map_err(|e| ScheduleError::storage("department lookup failed", e))?;
    if !exists {
        return Err(ScheduleError::new(
            "unknown_department",
            format!("department {} not found", req.department_id),
        ));
    }
    let rooms = store
        .fetch_classrooms(req.department_id)
        .map_err(|e| ScheduleError::storage("classroom lookup failed", e))?;
    if rooms.iter().all(|r| r.capacity <= 0) {
        return Err(ScheduleError::new(
            "no_classrooms",
            "the department has no classrooms with seats",
        ));
    }
    Ok(grid)
}

pub struct ExamScheduler<'s, S: ScheduleStore + ?Sized> {
    store: &'s S,
}

impl<'s, S: ScheduleStore + ?Sized> ExamScheduler<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// Full regeneration for one department. Never fails outright: fatal
    /// problems come back as an unsuccessful summary.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        req: &GenerateRequest,
        run_id: &str,
        rng: &mut R,
    ) -> ScheduleSummary {
        let max_messages = req.constraints.max_messages.max(1);
        match self.run(req, rng) {
            Ok(outcome) => {
                let summary = outcome.into_summary(run_id, max_messages);
                log::info!(
                    "run {run_id}: department {} -> {} ({} warning(s), {} error(s))",
                    req.department_id,
                    summary.message,
                    summary.warnings_total,
                    summary.errors_total
                );
                summary
            }
            Err(e) => {
                log::warn!(
                    "run {run_id}: department {} rejected: {e}",
                    req.department_id
                );
                ScheduleSummary::failed(run_id, e)
            }
        }
    }

    pub fn run<R: Rng + ?Sized>(
        &self,
        req: &GenerateRequest,
        rng: &mut R,
    ) -> Result<RunOutcome, ScheduleError> {
        let grid = validate_request(self.store, req)?;
        let exam_types = normalize_exam_types(&req.exam_types);
        let policy = &req.constraints;

        self.store
            .purge_department_schedule(req.department_id)
            .map_err(|e| ScheduleError::storage("failed to clear the previous schedule", e))?;

        let mut outcome = RunOutcome::default();
        let courses = self.candidate_courses(req, &mut outcome.warnings)?;
        let classrooms = self
            .store
            .fetch_classrooms(req.department_id)
            .map_err(|e| ScheduleError::storage("classroom lookup failed", e))?;

        let mut index = ConflictIndex::new();
        let mut schedulable: Vec<&Course> = Vec::with_capacity(courses.len());
        for course in &courses {
            match self.store.fetch_enrolled_student_ids(course.id) {
                Ok(ids) => {
                    index.insert(course.id, ids);
                    schedulable.push(course);
                }
                Err(e) => outcome
                    .errors
                    .push(format!("{}: failed to load enrollments: {e:#}", course.code)),
            }
        }
        log::info!(
            "department {}: {} course(s) x {} exam type(s) over {} slot(s)",
            req.department_id,
            schedulable.len(),
            exam_types.len(),
            grid.len()
        );

        for exam_type in &exam_types {
            for course in &schedulable {
                let label = format!("{} ({exam_type})", course.code);
                let Some(slot) = self.find_slot(course.id, &grid, &outcome.placed, &index, policy)
                else {
                    log::warn!("{label}: no conflict-free slot");
                    outcome
                        .errors
                        .push(format!("{label}: no conflict-free slot in the date range"));
                    outcome.unscheduled.push((course.id, exam_type.clone()));
                    continue;
                };

                let exam_id = match self.store.create_exam(
                    course.id,
                    exam_type,
                    slot.date,
                    slot.time,
                    policy.duration_for(course.id),
                ) {
                    Ok(id) => id,
                    Err(e) => {
                        outcome.errors.push(format!("{label}: {e:#}"));
                        outcome.unscheduled.push((course.id, exam_type.clone()));
                        continue;
                    }
                };

                let need = index.roster_len(course.id) as i64;
                let allocation = allocate_classrooms(exam_id, need, &classrooms);
                for share in &allocation.shares {
                    if let Err(e) = self.store.create_exam_assignment(exam_id, share.classroom_id) {
                        outcome.errors.push(format!("{label}: {e:#}"));
                    }
                }
                if allocation.unplaced > 0 {
                    outcome.warnings.push(format!(
                        "{label}: {need} student(s) may not fit, {} placed and {} without a classroom",
                        allocation.placed(),
                        allocation.unplaced
                    ));
                }

                outcome.placed.push(PlacedExam {
                    exam_id,
                    course_id: course.id,
                    class_level: course.class_level,
                    slot,
                });
            }
        }

        if policy.generate_seating {
            let codes: HashMap<i64, &str> =
                courses.iter().map(|c| (c.id, c.code.as_str())).collect();
            for placed in &outcome.placed {
                let label = format!(
                    "exam {} ({})",
                    placed.exam_id,
                    codes.get(&placed.course_id).copied().unwrap_or("?")
                );
                let report =
                    plan_exam_seating(self.store, placed.exam_id, placed.course_id, &label, rng);
                outcome.seating.absorb(report);
            }
        }

        Ok(outcome)
    }

    fn candidate_courses(
        &self,
        req: &GenerateRequest,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<Course>, ScheduleError> {
        let courses = self
            .store
            .fetch_courses_with_enrollment_counts(req.department_id)
            .map_err(|e| ScheduleError::storage("course lookup failed", e))?;
        let Some(wanted) = req.constraints.course_ids.as_ref() else {
            return Ok(courses);
        };
        let wanted: HashSet<i64> = wanted.iter().copied().collect();
        let known: HashSet<i64> = courses.iter().map(|c| c.id).collect();
        let mut missing: Vec<i64> = wanted.difference(&known).copied().collect();
        missing.sort_unstable();
        for id in missing {
            warnings.push(format!("course {id} is not part of this department, skipped"));
        }
        Ok(courses
            .into_iter()
            .filter(|c| wanted.contains(&c.id))
            .collect())
    }

    fn find_slot(
        &self,
        course_id: i64,
        grid: &SlotGrid,
        placed: &[PlacedExam],
        index: &ConflictIndex,
        policy: &ScheduleConstraints,
    ) -> Option<Slot> {
        grid.iter()
            .find(|slot| slot_accepted(course_id, *slot, placed, index, policy))
    }
}

/// The acceptance rule for one candidate slot.
pub fn slot_accepted(
    course_id: i64,
    slot: Slot,
    placed: &[PlacedExam],
    index: &ConflictIndex,
    policy: &ScheduleConstraints,
) -> bool {
    if policy.no_simultaneous_exams && placed.iter().any(|p| p.slot == slot) {
        return false;
    }
    if index.student_conflict_at(course_id, slot, placed) {
        return false;
    }
    !index.waiting_time_violation(course_id, slot, placed, policy.waiting_time_minutes)
}

/// Removes every exam, room assignment and seat of the department.
pub fn clear<S: ScheduleStore + ?Sized>(store: &S, department_id: i64) -> bool {
    match store.purge_department_schedule(department_id) {
        Ok(()) => true,
        Err(e) => {
            log::error!("clearing schedule of department {department_id} failed: {e:#}");
            false
        }
    }
}
