use serde::{Deserialize, Serialize};

use crate::EMBEDDING_DIMS;

/// A code symbol (§3). Identity is deterministic — see
/// [`crate::identity::node_qualified_prefix`] — so the graph writer's upserts
/// are idempotent across reruns on unchanged content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: i64,
    pub workspace_id: i64,
    pub package_id: Option<i64>,
    pub file_path: String,
    pub name: String,
    /// Unique within the owning workspace (I4).
    pub qualified_name: String,
    pub kind: NodeKind,
    pub language: String,
    pub signature: String,
    pub start_line: u32,
    pub end_line: u32,
    pub source: String,
    pub docstring: Option<String>,
    /// SHA-256 hex digest over `source`'s exact byte range (§4.4).
    pub body_hash: String,
    /// Present only once the embedder has produced a vector (I5: requires
    /// `body_hash` to be set, which it always is by construction here).
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Module,
    Function,
    Method,
    Class,
    Interface,
    Struct,
    Enum,
    TypeAlias,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Module => "module",
            NodeKind::Function => "function",
            NodeKind::Method => "method",
            NodeKind::Class => "class",
            NodeKind::Interface => "interface",
            NodeKind::Struct => "struct",
            NodeKind::Enum => "enum",
            NodeKind::TypeAlias => "type_alias",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "file" => NodeKind::File,
            "module" => NodeKind::Module,
            "function" => NodeKind::Function,
            "method" => NodeKind::Method,
            "class" => NodeKind::Class,
            "interface" => NodeKind::Interface,
            "struct" => NodeKind::Struct,
            "enum" => NodeKind::Enum,
            "type_alias" => NodeKind::TypeAlias,
            _ => return None,
        })
    }
}

impl Node {
    /// I5: a node with a non-null embedding must carry a dimension-matched
    /// vector and a non-null body hash (the latter always holds here since
    /// `body_hash` is not `Option`).
    pub fn embedding_is_valid(&self) -> bool {
        match &self.embedding {
            None => true,
            Some(v) => v.len() == EMBEDDING_DIMS,
        }
    }
}
