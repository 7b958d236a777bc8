use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::jobs::JobTracker;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Background schedule runs; shared with worker threads.
    pub jobs: JobTracker,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            jobs: JobTracker::new(),
        }
    }
}
