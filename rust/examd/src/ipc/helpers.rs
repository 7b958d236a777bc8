use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::Value;

use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::model::parse_date;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn bad_params(req: &Request, message: impl Into<String>) -> Value {
    err(&req.id, "bad_params", message, None)
}

pub fn required_str(req: &Request, key: &str) -> Result<String, Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| bad_params(req, format!("missing {}", key)))
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| bad_params(req, format!("missing or non-integer {}", key)))
}

pub fn opt_i64(req: &Request, key: &str) -> Result<Option<i64>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| bad_params(req, format!("{} must be integer or null", key))),
    }
}

pub fn opt_u64(req: &Request, key: &str) -> Result<Option<u64>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| bad_params(req, format!("{} must be a non-negative integer", key))),
    }
}

pub fn opt_str(req: &Request, key: &str) -> Result<Option<String>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| bad_params(req, format!("{} must be string or null", key)))?
                .trim()
                .to_string();
            Ok(if s.is_empty() { None } else { Some(s) })
        }
    }
}

pub fn required_date(req: &Request, key: &str) -> Result<NaiveDate, Value> {
    let raw = required_str(req, key)?;
    parse_date(&raw).ok_or_else(|| bad_params(req, format!("{} must be YYYY-MM-DD", key)))
}

pub fn string_array(req: &Request, key: &str) -> Result<Vec<String>, Value> {
    let Some(raw) = req.params.get(key) else {
        return Err(bad_params(req, format!("missing {}", key)));
    };
    let arr = raw
        .as_array()
        .ok_or_else(|| bad_params(req, format!("{} must be array of strings", key)))?;
    arr.iter()
        .map(|item| {
            item.as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| bad_params(req, format!("{} must be array of strings", key)))
        })
        .collect()
}

pub fn i64_array(req: &Request, key: &str) -> Result<Vec<i64>, Value> {
    let arr = req
        .params
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| bad_params(req, format!("{} must be array of integers", key)))?;
    arr.iter()
        .map(|item| {
            item.as_i64()
                .ok_or_else(|| bad_params(req, format!("{} must be array of integers", key)))
        })
        .collect()
}
