//! Storage seam between the scheduling core and the workspace database.
//!
//! The core only talks to [`ScheduleStore`]; [`SqliteStore`] is the
//! implementation used by the daemon. Read-side joins used by the IPC
//! layer (schedule listing, seating views, run history) live on
//! `SqliteStore` directly since the core never needs them.

use anyhow::Context;
use chrono::{NaiveDate, NaiveTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::model::{
    format_date, format_time, parse_date, parse_time, Classroom, ClassroomLoad, Course, Exam,
    ScheduledExamRow, SeatAssignment, SeatRow, Student,
};

pub trait ScheduleStore {
    fn department_exists(&self, department_id: i64) -> anyhow::Result<bool>;

    /// Department courses ordered by class level, then code.
    fn fetch_courses_with_enrollment_counts(&self, department_id: i64)
        -> anyhow::Result<Vec<Course>>;

    fn fetch_enrolled_student_ids(&self, course_id: i64) -> anyhow::Result<Vec<i64>>;

    /// Enrolled students ordered by student number.
    fn fetch_course_students(&self, course_id: i64) -> anyhow::Result<Vec<Student>>;

    /// Department classrooms ordered by capacity descending.
    fn fetch_classrooms(&self, department_id: i64) -> anyhow::Result<Vec<Classroom>>;

    /// Scheduled exams of the department ordered by date and start time.
    fn fetch_department_exams(&self, department_id: i64) -> anyhow::Result<Vec<Exam>>;

    /// Rooms assigned to an exam, capacity descending.
    fn fetch_exam_classrooms(&self, exam_id: i64) -> anyhow::Result<Vec<Classroom>>;

    /// Deletes seating, then exam assignments, then exams of the department.
    fn purge_department_schedule(&self, department_id: i64) -> anyhow::Result<()>;

    fn create_exam(
        &self,
        course_id: i64,
        exam_type: &str,
        date: NaiveDate,
        time: NaiveTime,
        duration_minutes: i64,
    ) -> anyhow::Result<i64>;

    fn create_exam_assignment(&self, exam_id: i64, classroom_id: i64) -> anyhow::Result<()>;

    fn create_seating_row(&self, seat: &SeatAssignment) -> anyhow::Result<()>;

    /// Replaces every seat of the exam, across all of its rooms, as a single
    /// unit. Old rows go first so a student may move between rooms.
    fn replace_exam_seating(&self, exam_id: i64, seats: &[SeatAssignment])
        -> anyhow::Result<()>;
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

const CLASSROOM_COLUMNS: &str =
    "cl.id, cl.department_id, cl.code, cl.name, cl.capacity, cl.rows_count, cl.cols_count, cl.seating_type";

fn classroom_from_row(row: &Row<'_>) -> rusqlite::Result<Classroom> {
    Ok(Classroom {
        id: row.get(0)?,
        department_id: row.get(1)?,
        code: row.get(2)?,
        name: row.get(3)?,
        capacity: row.get(4)?,
        rows_count: row.get(5)?,
        cols_count: row.get(6)?,
        seating_type: row.get(7)?,
    })
}

fn bad_column(idx: usize, what: &str, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("invalid {what}: {raw}").into(),
    )
}

fn date_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    parse_date(&raw).ok_or_else(|| bad_column(idx, "date", &raw))
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveTime> {
    let raw: String = row.get(idx)?;
    parse_time(&raw).ok_or_else(|| bad_column(idx, "time", &raw))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: String,
    pub department_id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub success: Option<bool>,
    pub scheduled_count: Option<i64>,
    pub unscheduled_count: Option<i64>,
    pub warnings_total: Option<i64>,
    pub errors_total: Option<i64>,
    pub message: Option<String>,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn clear_department_seating(&self, department_id: i64) -> anyhow::Result<usize> {
        let n = self.conn.execute(
            "DELETE FROM seating_assignments
             WHERE exam_id IN (
               SELECT e.id FROM exams e
               JOIN courses c ON c.id = e.course_id
               WHERE c.department_id = ?
             )",
            [department_id],
        )?;
        Ok(n)
    }

    pub fn scheduled_exams(&self, department_id: i64) -> anyhow::Result<Vec<ScheduledExamRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT e.id, e.exam_type, e.exam_date, e.start_time, e.duration_minutes,
                    c.id, c.code, c.name, c.class_level, i.full_name
             FROM exams e
             JOIN courses c ON c.id = e.course_id
             LEFT JOIN instructors i ON i.id = c.instructor_id
             WHERE c.department_id = ?
             ORDER BY e.exam_date, e.start_time, c.class_level, c.code",
        )?;
        let mut exams = stmt
            .query_map([department_id], |row| {
                Ok(ScheduledExamRow {
                    id: row.get(0)?,
                    exam_type: row.get(1)?,
                    exam_date: date_col(row, 2)?,
                    start_time: time_col(row, 3)?,
                    duration_minutes: row.get(4)?,
                    course_id: row.get(5)?,
                    course_code: row.get(6)?,
                    course_name: row.get(7)?,
                    class_level: row.get(8)?,
                    instructor_name: row.get(9)?,
                    classroom_codes: Vec::new(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut rooms_stmt = self.conn.prepare(
            "SELECT cl.code
             FROM exam_assignments ea
             JOIN classrooms cl ON cl.id = ea.classroom_id
             WHERE ea.exam_id = ?
             ORDER BY cl.capacity DESC, cl.id",
        )?;
        for exam in exams.iter_mut() {
            exam.classroom_codes = rooms_stmt
                .query_map([exam.id], |r| r.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
        }
        Ok(exams)
    }

    pub fn seating_plan(
        &self,
        exam_id: i64,
        classroom_id: Option<i64>,
    ) -> anyhow::Result<Vec<SeatRow>> {
        let map_row = |row: &Row<'_>| -> rusqlite::Result<SeatRow> {
            Ok(SeatRow {
                exam_id: row.get(0)?,
                classroom_id: row.get(1)?,
                classroom_code: row.get(2)?,
                classroom_name: row.get(3)?,
                seat_row: row.get(4)?,
                seat_col: row.get(5)?,
                student_id: row.get(6)?,
                student_no: row.get(7)?,
                full_name: row.get(8)?,
            })
        };
        let select = "SELECT sa.exam_id, cl.id, cl.code, cl.name, sa.seat_row, sa.seat_col,
                             s.id, s.student_no, s.full_name
                      FROM seating_assignments sa
                      JOIN students s ON s.id = sa.student_id
                      JOIN classrooms cl ON cl.id = sa.classroom_id";
        let rows = match classroom_id {
            Some(cid) => {
                let mut stmt = self.conn.prepare(&format!(
                    "{select} WHERE sa.exam_id = ? AND sa.classroom_id = ?
                     ORDER BY sa.seat_row, sa.seat_col"
                ))?;
                let rows = stmt
                    .query_map((exam_id, cid), map_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "{select} WHERE sa.exam_id = ?
                     ORDER BY cl.code, sa.seat_row, sa.seat_col"
                ))?;
                let rows = stmt
                    .query_map([exam_id], map_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    }

    pub fn classroom_load(&self, department_id: i64) -> anyhow::Result<Vec<ClassroomLoad>> {
        let mut stmt = self.conn.prepare(
            "SELECT e.id, e.exam_date, e.start_time, e.exam_type, c.code, c.name,
                    cl.id, cl.code, cl.capacity,
                    (SELECT COUNT(*) FROM seating_assignments sa
                     WHERE sa.exam_id = e.id AND sa.classroom_id = cl.id) AS seated_count
             FROM exams e
             JOIN courses c ON c.id = e.course_id
             JOIN exam_assignments ea ON ea.exam_id = e.id
             JOIN classrooms cl ON cl.id = ea.classroom_id
             WHERE c.department_id = ?
             ORDER BY e.exam_date, e.start_time, cl.code",
        )?;
        let rows = stmt
            .query_map([department_id], |row| {
                Ok(ClassroomLoad {
                    exam_id: row.get(0)?,
                    exam_date: date_col(row, 1)?,
                    start_time: time_col(row, 2)?,
                    exam_type: row.get(3)?,
                    course_code: row.get(4)?,
                    course_name: row.get(5)?,
                    classroom_id: row.get(6)?,
                    classroom_code: row.get(7)?,
                    capacity: row.get(8)?,
                    seated_count: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn record_run_started(&self, run_id: &str, department_id: i64) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO schedule_runs(run_id, department_id, started_at) VALUES(?, ?, ?)",
            (run_id, department_id, Utc::now().to_rfc3339()),
        )?;
        Ok(())
    }

    pub fn record_run_finished(
        &self,
        run_id: &str,
        summary: &crate::scheduler::ScheduleSummary,
    ) -> anyhow::Result<()> {
        self.conn.execute(
            "UPDATE schedule_runs
             SET finished_at = ?, success = ?, scheduled_count = ?, unscheduled_count = ?,
                 warnings_total = ?, errors_total = ?, message = ?
             WHERE run_id = ?",
            (
                Utc::now().to_rfc3339(),
                summary.success,
                summary.scheduled_count as i64,
                summary.unscheduled_count as i64,
                summary.warnings_total as i64,
                summary.errors_total as i64,
                &summary.message,
                run_id,
            ),
        )?;
        Ok(())
    }

    pub fn list_runs(&self, department_id: i64, limit: i64) -> anyhow::Result<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, department_id, started_at, finished_at, success, scheduled_count,
                    unscheduled_count, warnings_total, errors_total, message
             FROM schedule_runs
             WHERE department_id = ?
             ORDER BY started_at DESC, rowid DESC
             LIMIT ?",
        )?;
        let rows = stmt
            .query_map((department_id, limit), |row| {
                Ok(RunRecord {
                    run_id: row.get(0)?,
                    department_id: row.get(1)?,
                    started_at: row.get(2)?,
                    finished_at: row.get(3)?,
                    success: row.get(4)?,
                    scheduled_count: row.get(5)?,
                    unscheduled_count: row.get(6)?,
                    warnings_total: row.get(7)?,
                    errors_total: row.get(8)?,
                    message: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl ScheduleStore for SqliteStore<'_> {
    fn department_exists(&self, department_id: i64) -> anyhow::Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM departments WHERE id = ?",
                [department_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn fetch_courses_with_enrollment_counts(
        &self,
        department_id: i64,
    ) -> anyhow::Result<Vec<Course>> {
        // Correlated subquery keeps zero-enrollment courses with a 0 count.
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.department_id, c.code, c.name, c.class_level, c.instructor_id,
                    (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id) AS student_count
             FROM courses c
             WHERE c.department_id = ?
             ORDER BY c.class_level, c.code",
        )?;
        let rows = stmt
            .query_map([department_id], |row| {
                Ok(Course {
                    id: row.get(0)?,
                    department_id: row.get(1)?,
                    code: row.get(2)?,
                    name: row.get(3)?,
                    class_level: row.get(4)?,
                    instructor_id: row.get(5)?,
                    student_count: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("failed to load department courses")?;
        Ok(rows)
    }

    fn fetch_enrolled_student_ids(&self, course_id: i64) -> anyhow::Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT student_id FROM enrollments WHERE course_id = ?")?;
        let ids = stmt
            .query_map([course_id], |r| r.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn fetch_course_students(&self, course_id: i64) -> anyhow::Result<Vec<Student>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT s.id, s.student_no, s.full_name, s.class_level
             FROM students s
             JOIN enrollments e ON e.student_id = s.id
             WHERE e.course_id = ?
             ORDER BY s.student_no",
        )?;
        let rows = stmt
            .query_map([course_id], |row| {
                Ok(Student {
                    id: row.get(0)?,
                    student_no: row.get(1)?,
                    full_name: row.get(2)?,
                    class_level: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn fetch_classrooms(&self, department_id: i64) -> anyhow::Result<Vec<Classroom>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CLASSROOM_COLUMNS}
             FROM classrooms cl
             WHERE cl.department_id = ?
             ORDER BY cl.capacity DESC, cl.id"
        ))?;
        let rows = stmt
            .query_map([department_id], classroom_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn fetch_department_exams(&self, department_id: i64) -> anyhow::Result<Vec<Exam>> {
        let mut stmt = self.conn.prepare(
            "SELECT e.id, e.course_id, e.exam_type, e.exam_date, e.start_time, e.duration_minutes
             FROM exams e
             JOIN courses c ON c.id = e.course_id
             WHERE c.department_id = ?
             ORDER BY e.exam_date, e.start_time, e.id",
        )?;
        let rows = stmt
            .query_map([department_id], |row| {
                Ok(Exam {
                    id: row.get(0)?,
                    course_id: row.get(1)?,
                    exam_type: row.get(2)?,
                    exam_date: date_col(row, 3)?,
                    start_time: time_col(row, 4)?,
                    duration_minutes: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn fetch_exam_classrooms(&self, exam_id: i64) -> anyhow::Result<Vec<Classroom>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {CLASSROOM_COLUMNS}
             FROM exam_assignments ea
             JOIN classrooms cl ON cl.id = ea.classroom_id
             WHERE ea.exam_id = ?
             ORDER BY cl.capacity DESC, cl.id"
        ))?;
        let rows = stmt
            .query_map([exam_id], classroom_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn purge_department_schedule(&self, department_id: i64) -> anyhow::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        // Dependency order; there is no ON DELETE CASCADE.
        tx.execute(
            "DELETE FROM seating_assignments
             WHERE exam_id IN (
               SELECT e.id FROM exams e
               JOIN courses c ON c.id = e.course_id
               WHERE c.department_id = ?
             )",
            [department_id],
        )
        .context("failed to delete seating_assignments")?;
        tx.execute(
            "DELETE FROM exam_assignments
             WHERE exam_id IN (
               SELECT e.id FROM exams e
               JOIN courses c ON c.id = e.course_id
               WHERE c.department_id = ?
             )",
            [department_id],
        )
        .context("failed to delete exam_assignments")?;
        tx.execute(
            "DELETE FROM exams
             WHERE course_id IN (SELECT id FROM courses WHERE department_id = ?)",
            [department_id],
        )
        .context("failed to delete exams")?;
        tx.commit()?;
        Ok(())
    }

    fn create_exam(
        &self,
        course_id: i64,
        exam_type: &str,
        date: NaiveDate,
        time: NaiveTime,
        duration_minutes: i64,
    ) -> anyhow::Result<i64> {
        self.conn
            .execute(
                "INSERT INTO exams(course_id, exam_type, exam_date, start_time, duration_minutes)
                 VALUES(?, ?, ?, ?, ?)",
                (
                    course_id,
                    exam_type,
                    format_date(date),
                    format_time(time),
                    duration_minutes,
                ),
            )
            .context("failed to insert exam")?;
        Ok(self.conn.last_insert_rowid())
    }

    fn create_exam_assignment(&self, exam_id: i64, classroom_id: i64) -> anyhow::Result<()> {
        self.conn
            .execute(
                "INSERT INTO exam_assignments(exam_id, classroom_id) VALUES(?, ?)",
                (exam_id, classroom_id),
            )
            .context("failed to insert exam assignment")?;
        Ok(())
    }

    fn create_seating_row(&self, seat: &SeatAssignment) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO seating_assignments(exam_id, student_id, classroom_id, seat_row, seat_col)
             VALUES(?, ?, ?, ?, ?)",
            (
                seat.exam_id,
                seat.student_id,
                seat.classroom_id,
                seat.seat_row,
                seat.seat_col,
            ),
        )?;
        Ok(())
    }

    fn replace_exam_seating(&self, exam_id: i64, seats: &[SeatAssignment]) -> anyhow::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM seating_assignments WHERE exam_id = ?", [exam_id])
            .context("failed to clear previous seating")?;
        for seat in seats {
            self.create_seating_row(seat).with_context(|| {
                format!(
                    "failed to seat student {} in classroom {}",
                    seat.student_id, seat.classroom_id
                )
            })?;
        }
        tx.commit()?;
        Ok(())
    }
}
