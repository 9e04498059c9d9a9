//! In-memory job status map (§4.9, §5): `{jobId, projectId, status, stage,
//! progress, startedAt, doneAt?, result?, error?}`, guarded by a
//! `parking_lot::RwLock` so readers never block each other (§5).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::orchestrator::IndexSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub job_id: String,
    pub project_id: i64,
    pub status: JobState,
    pub stage: String,
    /// `0.0..=1.0`, the fraction of sources processed so far.
    pub progress: f32,
    pub started_at: DateTime<Utc>,
    pub done_at: Option<DateTime<Utc>>,
    pub result: Option<IndexSummary>,
    pub error: Option<String>,
}

impl JobStatus {
    pub fn new(job_id: String, project_id: i64, started_at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            project_id,
            status: JobState::Running,
            stage: "starting".to_string(),
            progress: 0.0,
            started_at,
            done_at: None,
            result: None,
            error: None,
        }
    }
}

/// Process-wide job-status singleton (§9 "Process-wide state"), keyed by
/// project id — the HTTP layer's status endpoint wants the current-or-last
/// job for a project, not a history of every job.
#[derive(Default)]
pub struct StatusStore {
    jobs: RwLock<HashMap<i64, JobStatus>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, project_id: i64) -> Option<JobStatus> {
        self.jobs.read().get(&project_id).cloned()
    }

    pub fn insert(&self, status: JobStatus) {
        self.jobs.write().insert(status.project_id, status);
    }

    pub fn update(&self, project_id: i64, f: impl FnOnce(&mut JobStatus)) {
        if let Some(status) = self.jobs.write().get_mut(&project_id) {
            f(status);
        }
    }
}
