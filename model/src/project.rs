use serde::{Deserialize, Serialize};

/// Root of containment (§3). A project owns one or more [`Source`]s; deleting
/// a project cascades to every source and everything the pipeline derived
/// from them.
///
/// [`Source`]: crate::source::Source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// Opaque configuration blob; the core does not interpret its shape.
    pub config: serde_json::Value,
}
