//! In-memory tracking of background schedule runs.
//!
//! Only one run per department may be in flight; a second request for the
//! same department is refused until the [`DepartmentClaim`] is dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use uuid::Uuid;

/// How long a finished job stays available to `schedule.jobStatus`.
const FINISHED_JOB_RETENTION_MINUTES: i64 = 60;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub department_id: i64,
    pub status: JobStatus,
    pub logs: Vec<LogEntry>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Run summary once the job has finished.
    pub result: Option<serde_json::Value>,
}

#[derive(Clone, Default)]
pub struct JobTracker {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
    running: Arc<Mutex<HashSet<i64>>>,
}

/// Exclusive right to schedule one department. Released on drop.
pub struct DepartmentClaim {
    department_id: i64,
    running: Arc<Mutex<HashSet<i64>>>,
}

impl DepartmentClaim {
    pub fn department_id(&self) -> i64 {
        self.department_id
    }
}

impl Drop for DepartmentClaim {
    fn drop(&mut self) {
        self.running.lock().remove(&self.department_id);
    }
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when a run for the department is already in progress.
    pub fn claim_department(&self, department_id: i64) -> Option<DepartmentClaim> {
        let mut running = self.running.lock();
        if !running.insert(department_id) {
            return None;
        }
        Some(DepartmentClaim {
            department_id,
            running: Arc::clone(&self.running),
        })
    }

    pub fn create_job(&self, department_id: i64) -> String {
        self.prune_finished(Utc::now() - Duration::minutes(FINISHED_JOB_RETENTION_MINUTES));
        let job_id = Uuid::new_v4().to_string();
        let job = Job {
            job_id: job_id.clone(),
            department_id,
            status: JobStatus::Running,
            logs: vec![],
            created_at: Utc::now(),
            completed_at: None,
            result: None,
        };
        self.jobs.write().insert(job_id.clone(), job);
        job_id
    }

    pub fn log(&self, job_id: &str, level: LogLevel, message: impl Into<String>) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(job_id) {
            job.logs.push(LogEntry {
                timestamp: Utc::now(),
                level,
                message: message.into(),
            });
        }
    }

    pub fn complete_job(&self, job_id: &str, result: serde_json::Value) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(job_id) {
            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
            job.result = Some(result);
        }
    }

    pub fn fail_job(&self, job_id: &str, error_message: impl Into<String>) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(job_id) {
            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
            job.logs.push(LogEntry {
                timestamp: Utc::now(),
                level: LogLevel::Error,
                message: error_message.into(),
            });
        }
    }

    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        self.jobs.read().get(job_id).cloned()
    }

    /// Drops jobs that finished before `cutoff`. Running jobs are kept.
    pub fn prune_finished(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, job| job.completed_at.map_or(true, |done| done >= cutoff));
        before - jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn second_claim_for_a_department_is_refused_until_release() {
        let tracker = JobTracker::new();
        let claim = tracker.claim_department(3).expect("first claim");
        assert!(tracker.claim_department(3).is_none());
        assert!(tracker.claim_department(4).is_some());
        drop(claim);
        assert!(tracker.claim_department(3).is_some());
    }

    #[test]
    fn job_lifecycle() {
        let tracker = JobTracker::new();
        let id = tracker.create_job(1);
        tracker.log(&id, LogLevel::Info, "started");
        assert_eq!(tracker.get_job(&id).expect("job").status, JobStatus::Running);

        tracker.complete_job(&id, json!({ "scheduledCount": 2 }));
        let job = tracker.get_job(&id).expect("job");
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
        assert_eq!(job.logs.len(), 1);
        assert_eq!(job.result, Some(json!({ "scheduledCount": 2 })));

        let failed = tracker.create_job(1);
        tracker.fail_job(&failed, "boom");
        let job = tracker.get_job(&failed).expect("job");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.logs[0].level, LogLevel::Error);
        assert!(tracker.get_job("missing").is_none());
    }

    #[test]
    fn finished_jobs_are_pruned_and_running_ones_kept() {
        let tracker = JobTracker::new();
        let done = tracker.create_job(1);
        tracker.complete_job(&done, json!({}));
        let failed = tracker.create_job(2);
        tracker.fail_job(&failed, "boom");
        let running = tracker.create_job(3);

        assert_eq!(tracker.prune_finished(Utc::now() - Duration::minutes(5)), 0);
        assert!(tracker.get_job(&done).is_some());

        assert_eq!(tracker.prune_finished(Utc::now() + Duration::minutes(5)), 2);
        assert!(tracker.get_job(&done).is_none());
        assert!(tracker.get_job(&failed).is_none());
        assert!(tracker.get_job(&running).is_some());
    }
}
