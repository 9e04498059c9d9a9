//! C11 Structural Query (§4.11): single-hop and transitive graph
//! traversals over the edge table.

use std::collections::{HashMap, HashSet};

use common::error::{ColonyError, Result};
use model::edge::EdgeKind;
use model::node::NodeKind;
use rusqlite::{Connection, OptionalExtension};

use crate::types::{NodeResult, clamp_depth, clamp_limit};

/// `callers(n)`: incoming `calls` edges, ordered by edge weight descending.
pub fn callers(conn: &Connection, node_id: i64, limit: Option<usize>) -> Result<Vec<NodeResult>> {
    single_hop(conn, node_id, EdgeKind::Calls, Direction::Incoming, limit)
}

/// `callees(n)`: outgoing `calls` edges.
pub fn callees(conn: &Connection, node_id: i64, limit: Option<usize>) -> Result<Vec<NodeResult>> {
    single_hop(conn, node_id, EdgeKind::Calls, Direction::Outgoing, limit)
}

/// `importers(n)`: incoming `imports` edges.
pub fn importers(conn: &Connection, node_id: i64, limit: Option<usize>) -> Result<Vec<NodeResult>> {
    single_hop(conn, node_id, EdgeKind::Imports, Direction::Incoming, limit)
}

/// `imports(n)`: outgoing `imports` edges (used by the context assembler's
/// annotation step, §4.12 step 4).
pub fn imports(conn: &Connection, node_id: i64, limit: Option<usize>) -> Result<Vec<NodeResult>> {
    single_hop(conn, node_id, EdgeKind::Imports, Direction::Outgoing, limit)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Incoming,
    Outgoing,
}

fn single_hop(
    conn: &Connection,
    node_id: i64,
    kind: EdgeKind,
    direction: Direction,
    limit: Option<usize>,
) -> Result<Vec<NodeResult>> {
    let limit = clamp_limit(limit);
    let sql = match direction {
        Direction::Incoming => {
            "SELECT n.id, n.qualified_name, n.file_path, n.kind, n.signature, s.alias
             FROM edges e JOIN nodes n ON e.source_id = n.id
             JOIN workspaces w ON n.workspace_id = w.id JOIN sources s ON w.source_id = s.id
             WHERE e.target_id = ?1 AND e.kind = ?2
             ORDER BY e.weight DESC LIMIT ?3"
        }
        Direction::Outgoing => {
            "SELECT n.id, n.qualified_name, n.file_path, n.kind, n.signature, s.alias
             FROM edges e JOIN nodes n ON e.target_id = n.id
             JOIN workspaces w ON n.workspace_id = w.id JOIN sources s ON w.source_id = s.id
             WHERE e.source_id = ?1 AND e.kind = ?2
             ORDER BY e.weight DESC LIMIT ?3"
        }
    };

    let mut stmt = conn.prepare(sql).map_err(|e| ColonyError::fatal("structural query", e))?;
    let rows = stmt
        .query_map(rusqlite::params![node_id, kind.as_str(), limit as i64], map_node_result)
        .map_err(|e| ColonyError::fatal("structural query", e))?;
    rows.collect::<std::result::Result<_, _>>().map_err(|e| ColonyError::fatal("structural query", e))
}

/// `dependencies(n, maxDepth)`: transitive outgoing traversal over
/// `{calls, imports, uses_type}`, minimum hop count per node, cycle-tolerant.
pub fn dependencies(conn: &Connection, node_id: i64, max_depth: Option<u32>, limit: Option<usize>) -> Result<Vec<NodeResult>> {
    transitive(conn, node_id, max_depth, limit, Direction::Outgoing)
}

/// `dependents(n, maxDepth)`: same traversal, direction reversed.
pub fn dependents(conn: &Connection, node_id: i64, max_depth: Option<u32>, limit: Option<usize>) -> Result<Vec<NodeResult>> {
    transitive(conn, node_id, max_depth, limit, Direction::Incoming)
}

fn transitive(
    conn: &Connection,
    node_id: i64,
    max_depth: Option<u32>,
    limit: Option<usize>,
    direction: Direction,
) -> Result<Vec<NodeResult>> {
    let max_depth = clamp_depth(max_depth);
    let limit = clamp_limit(limit);

    let mut stmt = conn
        .prepare(
            "SELECT source_id, target_id FROM edges
             WHERE kind IN ('calls', 'imports', 'uses_type')",
        )
        .map_err(|e| ColonyError::fatal("structural query", e))?;
    let edge_rows: Vec<(i64, i64)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(|e| ColonyError::fatal("structural query", e))?
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| ColonyError::fatal("structural query", e))?;
    drop(stmt);

    let mut adjacency: HashMap<i64, Vec<i64>> = HashMap::new();
    for (source, target) in edge_rows {
        let (from, to) = match direction {
            Direction::Outgoing => (source, target),
            Direction::Incoming => (target, source),
        };
        adjacency.entry(from).or_default().push(to);
    }

    // BFS, keeping the minimum hop count per node (set-union semantics
    // tolerate cycles: a node already visited is never re-enqueued).
    let mut depth_of: HashMap<i64, u32> = HashMap::new();
    let mut frontier: Vec<i64> = vec![node_id];
    let mut visited: HashSet<i64> = HashSet::from([node_id]);

    for depth in 1..=max_depth {
        let mut next = Vec::new();
        for node in &frontier {
            if let Some(neighbors) = adjacency.get(node) {
                for &neighbor in neighbors {
                    if visited.insert(neighbor) {
                        depth_of.insert(neighbor, depth);
                        next.push(neighbor);
                    }
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    let mut ordered: Vec<(i64, u32)> = depth_of.into_iter().collect();
    ordered.sort_by_key(|(id, depth)| (*depth, *id));
    ordered.truncate(limit);

    let mut results = Vec::with_capacity(ordered.len());
    for (id, depth) in ordered {
        if let Some(mut result) = fetch_node(conn, id)? {
            result.depth = Some(depth);
            results.push(result);
        }
    }
    Ok(results)
}

/// `file(path)`: all nodes whose `file_path` equals the argument in the
/// project, ordered by start line.
pub fn file(conn: &Connection, project_id: i64, path: &str) -> Result<Vec<NodeResult>> {
    let mut stmt = conn
        .prepare(
            "SELECT n.id, n.qualified_name, n.file_path, n.kind, n.signature, s.alias
             FROM nodes n
             JOIN workspaces w ON n.workspace_id = w.id JOIN sources s ON w.source_id = s.id
             WHERE w.project_id = ?1 AND n.file_path = ?2
             ORDER BY n.start_line ASC",
        )
        .map_err(|e| ColonyError::fatal("structural query", e))?;
    let rows = stmt
        .query_map(rusqlite::params![project_id, path], map_node_result)
        .map_err(|e| ColonyError::fatal("structural query", e))?;
    rows.collect::<std::result::Result<_, _>>().map_err(|e| ColonyError::fatal("structural query", e))
}

/// Bootstraps the above queries from a human-given name. When a qualified
/// name exists in more than one workspace of the project, returns the
/// first row ordered by workspace id (§9 decided open question); callers
/// needing disambiguation should pass `source_alias`.
pub fn find_by_qualified_name(
    conn: &Connection,
    project_id: i64,
    qualified_name: &str,
    source_alias: Option<&str>,
) -> Result<Option<NodeResult>> {
    let mut stmt = conn
        .prepare(
            "SELECT n.id, n.qualified_name, n.file_path, n.kind, n.signature, s.alias
             FROM nodes n
             JOIN workspaces w ON n.workspace_id = w.id JOIN sources s ON w.source_id = s.id
             WHERE w.project_id = ?1 AND n.qualified_name = ?2 AND (?3 IS NULL OR s.alias = ?3)
             ORDER BY w.id ASC LIMIT 1",
        )
        .map_err(|e| ColonyError::fatal("structural query", e))?;
    stmt.query_row(rusqlite::params![project_id, qualified_name, source_alias], map_node_result)
        .optional()
        .map_err(|e| ColonyError::fatal("structural query", e))
}

fn fetch_node(conn: &Connection, node_id: i64) -> Result<Option<NodeResult>> {
    conn.query_row(
        "SELECT n.id, n.qualified_name, n.file_path, n.kind, n.signature, s.alias
         FROM nodes n
         JOIN workspaces w ON n.workspace_id = w.id JOIN sources s ON w.source_id = s.id
         WHERE n.id = ?1",
        rusqlite::params![node_id],
        map_node_result,
    )
    .optional()
    .map_err(|e| ColonyError::fatal("structural query", e))
}

fn map_node_result(row: &rusqlite::Row) -> rusqlite::Result<NodeResult> {
    let kind_str: String = row.get(3)?;
    Ok(NodeResult {
        node_id: row.get(0)?,
        qualified_name: row.get(1)?,
        file_path: row.get(2)?,
        kind: NodeKind::from_str(&kind_str).unwrap_or(NodeKind::File),
        signature: row.get(4)?,
        depth: None,
        source_alias: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph::db;

    fn seed(conn: &Connection) {
        conn.execute("INSERT INTO projects (id, name) VALUES (1, 'p')", []).unwrap();
        conn.execute("INSERT INTO sources (id, project_id, path, alias) VALUES (1, 1, '/r', 'main')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO workspaces (id, project_id, source_id, kind) VALUES (1, 1, 1, 'standalone')",
            [],
        )
        .unwrap();
        for (id, name) in [(1, "a"), (2, "b"), (3, "c")] {
            conn.execute(
                "INSERT INTO nodes (id, workspace_id, file_path, name, qualified_name, kind, language,
                    signature, start_line, end_line, source, body_hash)
                 VALUES (?1, 1, 'f.ts', ?2, ?2, 'function', 'typescript', '', 1, 1, '', 'h')",
                rusqlite::params![id, name],
            )
            .unwrap();
        }
        conn.execute("INSERT INTO edges (source_id, target_id, kind, weight) VALUES (1, 2, 'calls', 0.5)", [])
            .unwrap();
        conn.execute("INSERT INTO edges (source_id, target_id, kind, weight) VALUES (2, 3, 'calls', 0.5)", [])
            .unwrap();
    }

    #[test]
    fn transitive_dependencies_reports_minimum_depth() {
        let conn = db::open_in_memory().unwrap();
        seed(&conn);
        let deps = dependencies(&conn, 1, Some(5), None).unwrap();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].qualified_name, "b");
        assert_eq!(deps[0].depth, Some(1));
        assert_eq!(deps[1].qualified_name, "c");
        assert_eq!(deps[1].depth, Some(2));
    }

    #[test]
    fn callees_returns_outgoing_calls() {
        let conn = db::open_in_memory().unwrap();
        seed(&conn);
        let out = callees(&conn, 1, None).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].qualified_name, "b");
    }

    #[test]
    fn unknown_qualified_name_returns_none() {
        let conn = db::open_in_memory().unwrap();
        seed(&conn);
        assert!(find_by_qualified_name(&conn, 1, "nope", None).unwrap().is_none());
    }
}
