use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A local repository attached to a [`Project`](crate::project::Project).
///
/// Carries the three watermarks the change detector (C1) and orchestrator
/// (C9) read and advance: `last_indexed_commit`, `last_indexed_branch`,
/// `last_indexed_at`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub id: i64,
    pub project_id: i64,
    /// Absolute filesystem path to the repository root.
    pub path: String,
    /// Human alias, unique within the owning project.
    pub alias: String,
    pub is_code: bool,
    pub last_indexed_commit: Option<String>,
    pub last_indexed_branch: Option<String>,
    pub last_indexed_at: Option<DateTime<Utc>>,
}

impl Source {
    pub fn new(id: i64, project_id: i64, path: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            id,
            project_id,
            path: path.into(),
            alias: alias.into(),
            is_code: true,
            last_indexed_commit: None,
            last_indexed_branch: None,
            last_indexed_at: None,
        }
    }

    /// Whether this source has never completed a successful index.
    pub fn is_unindexed(&self) -> bool {
        self.last_indexed_at.is_none()
    }
}
