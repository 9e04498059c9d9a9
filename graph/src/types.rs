//! Input DTOs the C7 graph writer accepts. Everything here is addressed by
//! relative paths and qualified names rather than database ids — the
//! writer is the only place ids get minted.

use model::edge::EdgeKind;
use model::node::NodeKind;
use model::workspace::{PackageManager, WorkspaceKind};
use parse::resolver::NodeRef;

#[derive(Debug, Clone)]
pub struct PackageInput {
    pub name: String,
    /// Relative path from the source root. `"."` matches the whole source
    /// (§4.7 step 3's longest-prefix rule).
    pub path: String,
    pub version: Option<String>,
    /// Source-relative path to the package's entry point, if C2 resolved
    /// one (§4.2's candidate search).
    pub entry_point: Option<String>,
}

/// A crawled file, used to synthesize the file-scoped pseudo-node that
/// roots the `contains` forest (I3) — C4's per-language front ends only
/// extract the symbols *within* a file, not the file node itself (§4.4).
#[derive(Debug, Clone)]
pub struct FileInput {
    pub file_path: String,
    pub language: String,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct NodeInput {
    pub file_path: String,
    pub name: String,
    pub qualified_name: String,
    pub kind: NodeKind,
    pub language: String,
    pub signature: String,
    pub start_line: u32,
    pub end_line: u32,
    pub source: String,
    pub docstring: Option<String>,
    pub body_hash: String,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone)]
pub struct EdgeInput {
    pub source: NodeRef,
    pub kind: EdgeKind,
    pub target: NodeRef,
    pub weight: f64,
    pub line: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct UnresolvedInput {
    pub source: NodeRef,
    pub specifier: String,
    pub kind: EdgeKind,
    pub line: Option<u32>,
}

/// Everything one source's pipeline run hands to the graph writer (§4.7).
#[derive(Debug, Clone)]
pub struct GraphWriteInput {
    pub project_id: i64,
    pub source_id: i64,
    pub workspace_kind: WorkspaceKind,
    pub package_manager: PackageManager,
    pub packages: Vec<PackageInput>,
    pub files: Vec<FileInput>,
    pub nodes: Vec<NodeInput>,
    pub edges: Vec<EdgeInput>,
    pub unresolved: Vec<UnresolvedInput>,
    /// Every relative file path from this run's crawl (§4.3), used for the
    /// stale-cleanup closure: a node whose `file_path` isn't in this set is
    /// removed (§4.7 step 6). An empty list means a full-workspace wipe.
    pub crawled_files: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteSummary {
    pub workspace_id: i64,
    pub nodes_written: usize,
    pub edges_written: usize,
    pub unresolved_written: usize,
    pub nodes_deleted: usize,
}
