use serde::{Deserialize, Serialize};

use crate::edge::EdgeKind;

/// A dangling import or call emitted by C5 (§3). Candidate for cross-source
/// linking (C8); removed once resolved or superseded by the next index run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnresolvedReference {
    pub id: i64,
    pub workspace_id: i64,
    pub source_node_id: i64,
    pub specifier: String,
    pub kind: EdgeKind,
    pub line: Option<u32>,
}
