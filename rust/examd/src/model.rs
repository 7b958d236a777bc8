use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

pub fn format_date(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

pub fn format_time(t: NaiveTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

/// Accepts `HH:MM` and, for rows written by older tools, `HH:MM:SS`.
pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

/// Serde adapter for `HH:MM` time-of-day values.
pub mod hhmm {
    use super::*;

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_time(*t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse_time(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid time (HH:MM): {raw}")))
    }
}

/// Same as [`hhmm`] for lists of slot times.
pub mod hhmm_list {
    use super::*;

    pub fn serialize<S: Serializer>(ts: &[NaiveTime], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(ts.iter().map(|t| format_time(*t)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<NaiveTime>, D::Error> {
        let raw = Vec::<String>::deserialize(d)?;
        raw.iter()
            .map(|s| {
                parse_time(s)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid time (HH:MM): {s}")))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: i64,
    pub department_id: i64,
    pub code: String,
    pub name: String,
    pub class_level: i64,
    pub instructor_id: Option<i64>,
    pub student_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: i64,
    pub student_no: String,
    pub full_name: String,
    pub class_level: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classroom {
    pub id: i64,
    pub department_id: i64,
    pub code: String,
    pub name: String,
    pub capacity: i64,
    pub rows_count: i64,
    pub cols_count: i64,
    pub seating_type: String,
}

impl Classroom {
    pub fn grid_size(&self) -> i64 {
        self.rows_count.max(0) * self.cols_count.max(0)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Exam {
    pub id: i64,
    pub course_id: i64,
    pub exam_type: String,
    pub exam_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatAssignment {
    pub exam_id: i64,
    pub student_id: i64,
    pub classroom_id: i64,
    pub seat_row: i64,
    pub seat_col: i64,
}

/// Exam joined with its course, instructor and assigned rooms.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledExamRow {
    pub id: i64,
    pub exam_type: String,
    pub exam_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    pub duration_minutes: i64,
    pub course_id: i64,
    pub course_code: String,
    pub course_name: String,
    pub class_level: i64,
    pub instructor_name: Option<String>,
    pub classroom_codes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatRow {
    pub exam_id: i64,
    pub classroom_id: i64,
    pub classroom_code: String,
    pub classroom_name: String,
    pub seat_row: i64,
    pub seat_col: i64,
    pub student_id: i64,
    pub student_no: String,
    pub full_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomLoad {
    pub exam_id: i64,
    pub exam_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    pub exam_type: String,
    pub course_code: String,
    pub course_name: String,
    pub classroom_id: i64,
    pub classroom_code: String,
    pub capacity: i64,
    pub seated_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_time_accepts_seconds_suffix() {
        assert_eq!(parse_time("09:00"), NaiveTime::from_hms_opt(9, 0, 0));
        assert_eq!(parse_time("13:30:00"), NaiveTime::from_hms_opt(13, 30, 0));
        assert_eq!(parse_time("9am"), None);
    }

    #[test]
    fn grid_size_ignores_negative_dimensions() {
        let room = Classroom {
            id: 1,
            department_id: 1,
            code: "A1".into(),
            name: "Hall".into(),
            capacity: 40,
            rows_count: -2,
            cols_count: 5,
            seating_type: "single".into(),
        };
        assert_eq!(room.grid_size(), 0);
    }
}
