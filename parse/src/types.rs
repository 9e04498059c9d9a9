//! Shapes shared by the per-language front ends (C4) and the resolver (C5).

use model::edge::EdgeKind;
use model::node::NodeKind;
use sha2::{Digest, Sha256};

/// A node extracted from one file, not yet a graph-writer `Node` since it
/// has no workspace/package id yet.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNode {
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
}

impl ParsedNode {
    pub fn new(
        name: impl Into<String>,
        qualified_name: impl Into<String>,
        kind: NodeKind,
        language: &str,
        signature: impl Into<String>,
        start_line: u32,
        end_line: u32,
        source: &str,
        docstring: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            qualified_name: qualified_name.into(),
            kind,
            language: language.to_string(),
            signature: signature.into(),
            start_line,
            end_line,
            source: source.to_string(),
            docstring,
            body_hash: body_hash(source.as_bytes()),
        }
    }
}

/// SHA-256 hex digest over a node's exact source byte range (§4.4). The sole
/// change-detection signal the embedder uses to decide whether to reuse a
/// stored vector (§4.6).
pub fn body_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Either the file-scoped pseudo-node (the root of the `contains` forest,
/// I3) or one of `ParsedFile::nodes` by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEndpoint {
    File,
    Node(usize),
}

/// An edge whose target has not yet been bound to a graph node. `Named`
/// carries the raw specifier/identifier text C5 resolves; `Resolved` is used
/// for edges C4 can already bind unambiguously (a class to a method it
/// directly contains, both known at parse time).
#[derive(Debug, Clone, PartialEq)]
pub enum RawTarget {
    Node(usize),
    /// Raw specifier (import path) or identifier (call/type/base-class
    /// name) awaiting resolution.
    Named(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawEdge {
    pub source: RawEndpoint,
    pub kind: EdgeKind,
    pub target: RawTarget,
    pub line: Option<u32>,
    /// For `imports`: the symbols named in the import clause, if any
    /// (§4.4 "with symbol list").
    pub symbols: Vec<String>,
}

impl RawEdge {
    pub fn new(source: RawEndpoint, kind: EdgeKind, target: RawTarget, line: Option<u32>) -> Self {
        Self { source, kind, target, line, symbols: Vec::new() }
    }

    pub fn with_symbols(mut self, symbols: Vec<String>) -> Self {
        self.symbols = symbols;
        self
    }
}

/// Output of a single file's C4 extraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFile {
    pub nodes: Vec<ParsedNode>,
    pub edges: Vec<RawEdge>,
}
