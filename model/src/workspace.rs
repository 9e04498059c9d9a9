use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One per [`Source`](crate::source::Source). Identity = `(project, source)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workspace {
    pub id: i64,
    pub project_id: i64,
    pub source_id: i64,
    pub kind: WorkspaceKind,
    pub package_manager: PackageManager,
    pub last_indexed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceKind {
    Standalone,
    Monorepo,
    /// A language-native workspace (e.g. a Go module workspace) that is
    /// neither a bare standalone package nor a JS-style monorepo.
    LanguageWorkspace,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PackageManager {
    #[default]
    None,
    Npm,
    Yarn,
    Pnpm,
    Go,
}

impl WorkspaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceKind::Standalone => "standalone",
            WorkspaceKind::Monorepo => "monorepo",
            WorkspaceKind::LanguageWorkspace => "language_workspace",
        }
    }
}
