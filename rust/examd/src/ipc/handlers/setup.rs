use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::db_conn;
use crate::ipc::types::{AppState, Request};
use crate::model::{format_time, parse_time};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
pub enum SetupSection {
    Scheduling,
    Seating,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduling" => Some(Self::Scheduling),
            "seating" => Some(Self::Seating),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Scheduling => "setup.scheduling",
            Self::Seating => "setup.seating",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Scheduling => json!({
            "defaultDurationMinutes": 120,
            "waitingTimeMinutes": 15,
            "noSimultaneousExams": false,
            "excludedWeekdays": [5, 6],
            "timeSlots": ["09:00", "11:00", "13:00", "15:00"],
            "generateSeating": true,
            "maxMessages": 20
        }),
        SetupSection::Seating => json!({
            "defaultSeatingType": "single",
            "fixedSeed": null
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_weekdays(v: &Value, key: &str) -> Result<Value, String> {
    let arr = v
        .as_array()
        .ok_or_else(|| format!("{} must be array of integers", key))?;
    let mut days = arr
        .iter()
        .map(|d| parse_i64_range(d, key, 0, 6))
        .collect::<Result<Vec<_>, _>>()?;
    days.sort_unstable();
    days.dedup();
    Ok(json!(days))
}

fn parse_time_slots(v: &Value, key: &str) -> Result<Value, String> {
    let arr = v
        .as_array()
        .ok_or_else(|| format!("{} must be array of HH:MM strings", key))?;
    if arr.is_empty() || arr.len() > 24 {
        return Err(format!("{} must contain 1..=24 times", key));
    }
    let mut times = Vec::with_capacity(arr.len());
    for item in arr {
        let raw = item
            .as_str()
            .ok_or_else(|| format!("{} must be array of HH:MM strings", key))?;
        let t = parse_time(raw).ok_or_else(|| format!("{}: invalid time {}", key, raw))?;
        times.push(t);
    }
    times.sort();
    times.dedup();
    Ok(json!(times.into_iter().map(format_time).collect::<Vec<_>>()))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Scheduling => match k.as_str() {
                "defaultDurationMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 15, 600)?));
                }
                "waitingTimeMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 600)?));
                }
                "noSimultaneousExams" | "generateSeating" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "excludedWeekdays" => {
                    obj.insert(k.clone(), parse_weekdays(v, k)?);
                }
                "timeSlots" => {
                    obj.insert(k.clone(), parse_time_slots(v, k)?);
                }
                "maxMessages" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 200)?));
                }
                _ => return Err(format!("unknown scheduling field: {}", k)),
            },
            SetupSection::Seating => match k.as_str() {
                "defaultSeatingType" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 32)?));
                }
                "fixedSeed" => {
                    if v.is_null() {
                        obj.insert(k.clone(), Value::Null);
                    } else {
                        let seed = v
                            .as_u64()
                            .ok_or_else(|| format!("{} must be a non-negative integer or null", k))?;
                        obj.insert(k.clone(), Value::from(seed));
                    }
                }
                _ => return Err(format!("unknown seating field: {}", k)),
            },
        }
    }
    Ok(())
}

/// Built-in defaults overlaid with whatever valid values the workspace saved.
pub fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values must not block scheduling.
            if let Err(e) = merge_section_patch(section, &mut current, saved_obj) {
                log::warn!("ignoring saved {}: {}", section.key(), e);
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let scheduling = match load_section(conn, SetupSection::Scheduling) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let seating = match load_section(conn, SetupSection::Seating) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "scheduling": scheduling,
            "seating": seating,
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true, "section": section_raw, "values": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
