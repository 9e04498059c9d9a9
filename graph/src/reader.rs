//! Read helpers shared by the embedder's reuse policy, the orchestrator's
//! job-status node/edge counts, and the cross-source resolver.

use std::collections::HashMap;

use common::error::{ColonyError, Result};
use rusqlite::{Connection, params};

use crate::vector;

/// `qualified_name -> body_hash` for every node in a workspace (§4.6 reuse
/// policy input).
pub fn fetch_body_hashes(conn: &Connection, workspace_id: i64) -> Result<HashMap<String, String>> {
    let mut stmt = conn
        .prepare("SELECT qualified_name, body_hash FROM nodes WHERE workspace_id = ?1")
        .map_err(|e| ColonyError::fatal("graph: reader", e))?;
    let rows = stmt
        .query_map(params![workspace_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(|e| ColonyError::fatal("graph: reader", e))?;
    rows.collect::<std::result::Result<_, _>>().map_err(|e| ColonyError::fatal("graph: reader", e))
}

/// `qualified_name -> embedding` for every node with a non-null vector in a
/// workspace (§4.6 reuse policy input).
pub fn fetch_vectors(conn: &Connection, workspace_id: i64) -> Result<HashMap<String, Vec<f32>>> {
    let mut stmt = conn
        .prepare("SELECT qualified_name, embedding FROM nodes WHERE workspace_id = ?1 AND embedding IS NOT NULL")
        .map_err(|e| ColonyError::fatal("graph: reader", e))?;
    let rows = stmt
        .query_map(params![workspace_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })
        .map_err(|e| ColonyError::fatal("graph: reader", e))?;

    let mut out = HashMap::new();
    for row in rows {
        let (name, bytes) = row.map_err(|e| ColonyError::fatal("graph: reader", e))?;
        if let Some(vec) = vector::decode(&bytes) {
            out.insert(name, vec);
        }
    }
    Ok(out)
}

/// Live node/edge counts for a project (§6 index-status response).
pub fn count_nodes_and_edges(conn: &Connection, project_id: i64) -> Result<(i64, i64)> {
    let node_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM nodes n JOIN workspaces w ON n.workspace_id = w.id WHERE w.project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )
        .map_err(|e| ColonyError::fatal("graph: reader", e))?;
    let edge_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM edges e
             JOIN nodes n ON e.source_id = n.id
             JOIN workspaces w ON n.workspace_id = w.id
             WHERE w.project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )
        .map_err(|e| ColonyError::fatal("graph: reader", e))?;
    Ok((node_count, edge_count))
}
