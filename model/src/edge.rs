use serde::{Deserialize, Serialize};

/// A directed, kinded relation between two nodes (§3). Primary key =
/// `(source_id, target_id, kind)` — I7 forbids duplicates; conflicting
/// inserts are reconciled by keeping the maximum weight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub source_id: i64,
    pub target_id: i64,
    pub kind: EdgeKind,
    pub weight: f64,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Contains,
    Imports,
    Calls,
    Extends,
    Implements,
    UsesType,
    Embeds,
    DependsOn,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Contains => "contains",
            EdgeKind::Imports => "imports",
            EdgeKind::Calls => "calls",
            EdgeKind::Extends => "extends",
            EdgeKind::Implements => "implements",
            EdgeKind::UsesType => "uses_type",
            EdgeKind::Embeds => "embeds",
            EdgeKind::DependsOn => "depends_on",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "contains" => EdgeKind::Contains,
            "imports" => EdgeKind::Imports,
            "calls" => EdgeKind::Calls,
            "extends" => EdgeKind::Extends,
            "implements" => EdgeKind::Implements,
            "uses_type" => EdgeKind::UsesType,
            "embeds" => EdgeKind::Embeds,
            "depends_on" => EdgeKind::DependsOn,
            _ => return None,
        })
    }

    /// Default structural weight (§4.7 step 4): `contains`, `extends`,
    /// `implements`, `embeds` are considered strongly structural; everything
    /// else gets the lower default weight.
    pub fn default_weight(&self) -> f64 {
        match self {
            EdgeKind::Contains | EdgeKind::Extends | EdgeKind::Implements | EdgeKind::Embeds => 1.0,
            _ => 0.5,
        }
    }

    /// Edge kinds traversed by transitive dependency queries (C11).
    pub const TRANSITIVE_DEPENDENCY_KINDS: [EdgeKind; 3] =
        [EdgeKind::Calls, EdgeKind::Imports, EdgeKind::UsesType];
}

impl Edge {
    pub fn new(source_id: i64, target_id: i64, kind: EdgeKind) -> Self {
        Self {
            source_id,
            target_id,
            kind,
            weight: kind.default_weight(),
            line: None,
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}
