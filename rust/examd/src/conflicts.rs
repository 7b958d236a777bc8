//! Per-run roster cache and the student-level conflict queries the
//! scheduler asks for every candidate slot.

use std::collections::{HashMap, HashSet};

use crate::slots::Slot;

/// An exam already placed earlier in the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedExam {
    pub exam_id: i64,
    pub course_id: i64,
    pub class_level: i64,
    pub slot: Slot,
}

/// course_id -> enrolled student ids, fetched once per run.
#[derive(Debug, Clone, Default)]
pub struct ConflictIndex {
    rosters: HashMap<i64, HashSet<i64>>,
}

impl ConflictIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<I>(&mut self, course_id: i64, students: I)
    where
        I: IntoIterator<Item = i64>,
    {
        self.rosters
            .entry(course_id)
            .or_default()
            .extend(students);
    }

    pub fn roster_len(&self, course_id: i64) -> usize {
        self.rosters.get(&course_id).map(|s| s.len()).unwrap_or(0)
    }

    /// True when at least one student is enrolled in both courses.
    pub fn shares_students(&self, a: i64, b: i64) -> bool {
        if a == b {
            return self.roster_len(a) > 0;
        }
        let (Some(ra), Some(rb)) = (self.rosters.get(&a), self.rosters.get(&b)) else {
            return false;
        };
        let (small, large) = if ra.len() <= rb.len() { (ra, rb) } else { (rb, ra) };
        small.iter().any(|s| large.contains(s))
    }

    /// Hard conflict: a student of `course_id` already sits an exam at `slot`.
    pub fn student_conflict_at(&self, course_id: i64, slot: Slot, placed: &[PlacedExam]) -> bool {
        placed
            .iter()
            .filter(|p| p.slot == slot)
            .any(|p| self.shares_students(course_id, p.course_id))
    }

    /// A student of `course_id` has another exam on the same date starting
    /// less than `waiting_minutes` away. Simultaneous exams are left to
    /// [`ConflictIndex::student_conflict_at`].
    pub fn waiting_time_violation(
        &self,
        course_id: i64,
        slot: Slot,
        placed: &[PlacedExam],
        waiting_minutes: i64,
    ) -> bool {
        if waiting_minutes <= 0 {
            return false;
        }
        placed.iter().any(|p| match p.slot.minutes_apart(&slot) {
            Some(gap) if gap > 0 && gap < waiting_minutes => {
                self.shares_students(course_id, p.course_id)
            }
            _ => false,
        })
    }
}
