//! Response DTOs shared by C10/C11/C12 (§6 "Response shapes for search").

use model::node::NodeKind;

/// One hybrid- or semantic-search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub node_id: i64,
    pub qualified_name: String,
    pub file_path: String,
    pub kind: NodeKind,
    pub signature: String,
    pub similarity: f32,
    pub source_code: Option<String>,
    pub docstring: Option<String>,
    pub source_alias: Option<String>,
}

/// One structural-query hit (§4.11); `depth` is set only by the transitive
/// `dependencies`/`dependents` queries.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeResult {
    pub node_id: i64,
    pub qualified_name: String,
    pub file_path: String,
    pub kind: NodeKind,
    pub signature: String,
    pub depth: Option<u32>,
    pub source_alias: Option<String>,
}

/// Clamps a caller-supplied limit to `[1, 100]`, defaulting to 10 when
/// absent (§4.10, reused verbatim by §4.11).
pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(10).clamp(1, 100)
}

/// Clamps a caller-supplied traversal depth to `[1, 10]`, defaulting to 5
/// (§4.11 `dependencies`/`dependents`).
pub fn clamp_depth(max_depth: Option<u32>) -> u32 {
    max_depth.unwrap_or(5).clamp(1, 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_limit_bounds() {
        assert_eq!(clamp_limit(None), 10);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(500)), 100);
        assert_eq!(clamp_limit(Some(42)), 42);
    }

    #[test]
    fn clamps_depth_bounds() {
        assert_eq!(clamp_depth(None), 5);
        assert_eq!(clamp_depth(Some(0)), 1);
        assert_eq!(clamp_depth(Some(50)), 10);
    }
}
