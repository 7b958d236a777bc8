//! Seat assignment inside the rooms an exam was given.
//!
//! Rooms are walked in capacity order and each takes up to its capacity
//! from the head of the remaining (student-number ordered) list. No
//! rotation happens here; the allocator's rotation only decides which rooms
//! are used. Inside a room the subset is shuffled and laid out row-major,
//! 1-indexed.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::model::{Classroom, SeatAssignment, Student};
use crate::store::ScheduleStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassroomSeating {
    pub classroom_id: i64,
    pub seats: Vec<SeatAssignment>,
    /// Students given to the room that its row×column grid cannot hold.
    pub overflow: Vec<i64>,
}

/// Shuffles `students` with `rng` and fills the room's grid row by row.
pub fn seat_classroom<R: Rng + ?Sized>(
    exam_id: i64,
    classroom: &Classroom,
    students: &[i64],
    rng: &mut R,
) -> ClassroomSeating {
    let mut order = students.to_vec();
    order.shuffle(rng);

    let cols = classroom.cols_count.max(0);
    let grid = classroom.grid_size() as usize;
    let fit = order.len().min(grid);

    let seats = order[..fit]
        .iter()
        .enumerate()
        .map(|(i, &student_id)| {
            let i = i as i64;
            SeatAssignment {
                exam_id,
                student_id,
                classroom_id: classroom.id,
                seat_row: i / cols + 1,
                seat_col: i % cols + 1,
            }
        })
        .collect();

    ClassroomSeating {
        classroom_id: classroom.id,
        seats,
        overflow: order[fit..].to_vec(),
    }
}

/// Head-of-list split of `students` across `classrooms` by capacity.
/// Returns the per-room slices plus whoever is left over.
pub fn partition_by_capacity<'c, 's>(
    classrooms: &'c [Classroom],
    students: &'s [Student],
) -> (Vec<(&'c Classroom, &'s [Student])>, &'s [Student]) {
    let mut rest = students;
    let mut out = Vec::with_capacity(classrooms.len());
    for room in classrooms {
        let take = (room.capacity.max(0) as usize).min(rest.len());
        let (head, tail) = rest.split_at(take);
        out.push((room, head));
        rest = tail;
    }
    (out, rest)
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatingReport {
    /// Classroom plans written.
    pub planned: usize,
    pub seated: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl SeatingReport {
    pub fn absorb(&mut self, other: SeatingReport) {
        self.planned += other.planned;
        self.seated += other.seated;
        self.warnings.extend(other.warnings);
        self.errors.extend(other.errors);
    }
}

/// Seats one exam across its assigned rooms. The exam's previous plan is
/// dropped first, so rooms that receive nobody end up empty.
pub fn plan_exam_seating<S, R>(
    store: &S,
    exam_id: i64,
    course_id: i64,
    label: &str,
    rng: &mut R,
) -> SeatingReport
where
    S: ScheduleStore + ?Sized,
    R: Rng + ?Sized,
{
    let mut report = SeatingReport::default();

    let students = match store.fetch_course_students(course_id) {
        Ok(s) => s,
        Err(e) => {
            report.errors.push(format!("{label}: failed to load students: {e:#}"));
            return report;
        }
    };
    let classrooms = match store.fetch_exam_classrooms(exam_id) {
        Ok(c) => c,
        Err(e) => {
            report.errors.push(format!("{label}: failed to load classrooms: {e:#}"));
            return report;
        }
    };
    if students.is_empty() {
        if let Err(e) = store.replace_exam_seating(exam_id, &[]) {
            report
                .errors
                .push(format!("{label}: previous seating not cleared: {e:#}"));
        }
        report
            .warnings
            .push(format!("{label}: no enrolled students to seat"));
        return report;
    }

    let (parts, unassigned) = partition_by_capacity(&classrooms, &students);
    let mut seats = Vec::with_capacity(students.len());
    let mut planned = 0;
    for (room, group) in parts {
        let ids: Vec<i64> = group.iter().map(|s| s.id).collect();
        let seating = seat_classroom(exam_id, room, &ids, rng);
        if !seating.overflow.is_empty() {
            report.warnings.push(format!(
                "{label}: classroom {} grid holds {} seats, {} student(s) left unseated",
                room.code,
                room.grid_size(),
                seating.overflow.len()
            ));
        }
        if !seating.seats.is_empty() {
            planned += 1;
        }
        seats.extend(seating.seats);
    }
    // Whole exam at once: a student may have moved to another room.
    match store.replace_exam_seating(exam_id, &seats) {
        Ok(()) => {
            report.planned += planned;
            report.seated += seats.len();
        }
        Err(e) => report
            .errors
            .push(format!("{label}: seating plan not saved: {e:#}")),
    }
    if !unassigned.is_empty() {
        report.warnings.push(format!(
            "{label}: {} student(s) exceed the assigned classroom capacity",
            unassigned.len()
        ));
    }
    report
}

/// Regenerates seating for every scheduled exam of a department.
pub fn plan_department_seating<S, R>(store: &S, department_id: i64, rng: &mut R) -> SeatingReport
where
    S: ScheduleStore + ?Sized,
    R: Rng + ?Sized,
{
    let mut report = SeatingReport::default();
    let exams = match store.fetch_department_exams(department_id) {
        Ok(e) => e,
        Err(e) => {
            report.errors.push(format!("failed to load exams: {e:#}"));
            return report;
        }
    };
    for exam in exams {
        let label = format!("exam {} ({})", exam.id, exam.exam_type);
        report.absorb(plan_exam_seating(store, exam.id, exam.course_id, &label, rng));
    }
    log::info!(
        "seating for department {department_id}: {} room plan(s), {} seated",
        report.planned,
        report.seated
    );
    report
}
