use serde::{Deserialize, Serialize};

/// An addressable unit inside a [`Workspace`](crate::workspace::Workspace).
/// Identity = `(workspace, name)`; `name` is unique within the workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Package {
    pub id: i64,
    pub workspace_id: i64,
    pub name: String,
    /// Relative path from the owning source's root. `"."` for the single
    /// anonymous package of a standalone workspace.
    pub path: String,
    pub version: Option<String>,
    /// Source-relative path to the package's resolved entry point (§4.2's
    /// candidate search), used by the cross-source resolver (C8) to find a
    /// sibling package's default import target.
    pub entry_point: Option<String>,
}

impl Package {
    /// Longest-prefix match used by the graph writer (§4.7 step 3) to assign
    /// a node's package id. `"."` or the empty path matches any file.
    pub fn matches_file_path(&self, file_path: &str) -> bool {
        if self.path.is_empty() || self.path == "." {
            return true;
        }
        let prefix = self.path.trim_end_matches('/');
        file_path == prefix || file_path.starts_with(&format!("{prefix}/"))
    }
}

/// Picks the package whose relative path is the longest prefix match of
/// `file_path`, per §4.7 step 3. Returns `None` only when `packages` is empty.
pub fn longest_prefix_match<'a>(packages: &'a [Package], file_path: &str) -> Option<&'a Package> {
    packages
        .iter()
        .filter(|p| p.matches_file_path(file_path))
        .max_by_key(|p| p.path.len())
}
