//! Candidate exam slots: every qualifying date in a range crossed with the
//! configured start times, date-major and time-minor.

use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::Serialize;

use crate::model::hhmm;
use crate::scheduler::ScheduleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
}

impl Slot {
    pub fn new(date: NaiveDate, time: NaiveTime) -> Self {
        Self { date, time }
    }

    /// Minutes between the two start times, or `None` on different dates.
    pub fn minutes_apart(&self, other: &Slot) -> Option<i64> {
        if self.date != other.date {
            return None;
        }
        Some((self.time - other.time).num_minutes().abs())
    }
}

pub fn default_time_slots() -> Vec<NaiveTime> {
    [9, 11, 13, 15]
        .into_iter()
        .filter_map(|h| NaiveTime::from_hms_opt(h, 0, 0))
        .collect()
}

/// Weekday index with Monday = 0 .. Sunday = 6.
pub fn weekday_index(d: NaiveDate) -> u32 {
    d.weekday().num_days_from_monday()
}

/// Restartable description of the slot grid. Nothing is materialized;
/// [`SlotGrid::iter`] walks the range on demand.
#[derive(Debug, Clone)]
pub struct SlotGrid {
    start: NaiveDate,
    end: NaiveDate,
    excluded: [bool; 7],
    times: Vec<NaiveTime>,
}

impl SlotGrid {
    pub fn new(
        start: NaiveDate,
        end: NaiveDate,
        excluded_weekdays: &[u32],
        times: &[NaiveTime],
    ) -> Result<Self, ScheduleError> {
        if start > end {
            return Err(ScheduleError::new(
                "invalid_date_range",
                "start date must not be after end date",
            ));
        }
        let mut excluded = [false; 7];
        for &w in excluded_weekdays {
            if w > 6 {
                return Err(ScheduleError::new(
                    "bad_weekday",
                    format!("excluded weekday out of range (0..=6): {w}"),
                ));
            }
            excluded[w as usize] = true;
        }

        let mut times = times.to_vec();
        times.sort();
        times.dedup();
        if times.is_empty() {
            return Err(ScheduleError::new(
                "no_time_slots",
                "at least one exam start time is required",
            ));
        }

        let grid = Self {
            start,
            end,
            excluded,
            times,
        };
        if grid.dates().next().is_none() {
            return Err(ScheduleError::new(
                "no_valid_days",
                format!(
                    "no valid exam days between {} and {}",
                    crate::model::format_date(start),
                    crate::model::format_date(end)
                ),
            ));
        }
        Ok(grid)
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        let end = self.end;
        self.start
            .iter_days()
            .take_while(move |d| *d <= end)
            .filter(move |d| !self.excluded[weekday_index(*d) as usize])
    }

    pub fn times(&self) -> &[NaiveTime] {
        &self.times
    }

    pub fn iter(&self) -> impl Iterator<Item = Slot> + '_ {
        self.dates()
            .flat_map(move |d| self.times.iter().map(move |t| Slot::new(d, *t)))
    }

    pub fn len(&self) -> usize {
        self.dates().count() * self.times.len()
    }
}
