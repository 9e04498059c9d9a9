//! C7 Graph Writer (§4.7): a single-transaction, six-step upsert of one
//! source's indexing run into the persisted graph. Deterministic node
//! identity (§3) is what makes every step idempotent across reruns.

use std::collections::HashMap;

use common::error::{ColonyError, Result};
use model::edge::EdgeKind;
use model::node::NodeKind;
use model::package::{Package, longest_prefix_match};
use parse::resolver::NodeRef;
use parse::types::body_hash;
use rusqlite::{Connection, OptionalExtension, params};

use crate::types::{EdgeInput, FileInput, GraphWriteInput, NodeInput, WriteSummary};
use crate::vector;

const NODE_BATCH_SIZE: usize = 1000;

/// Runs the six steps of §4.7 inside a single transaction. On any failure
/// the transaction rolls back and the error propagates as
/// [`ColonyError::Fatal`] ("graph writer transaction failure", §7).
pub fn write(conn: &mut Connection, input: &GraphWriteInput) -> Result<WriteSummary> {
    let tx = conn.transaction().map_err(|e| ColonyError::fatal("graph", e))?;

    // Step 1: upsert the workspace row.
    let workspace_id = upsert_workspace(&tx, input)?;

    // Step 2: upsert all packages.
    let packages = upsert_packages(&tx, workspace_id, input)?;

    // Step 3: upsert nodes (synthesized file nodes + extracted symbol nodes).
    let file_nodes = synthesize_file_nodes(input);
    let mut node_ids: HashMap<String, i64> = HashMap::new();
    let mut nodes_written = 0usize;
    for batch in file_nodes.iter().chain(input.nodes.iter()).collect::<Vec<_>>().chunks(NODE_BATCH_SIZE) {
        for node in batch {
            let package_id = longest_prefix_match(&packages, &node.file_path).map(|p| p.id);
            let id = upsert_node(&tx, workspace_id, package_id, node)?;
            node_ids.insert(node.qualified_name.clone(), id);
            nodes_written += 1;
        }
    }

    // Step 4: upsert edges (resolved + contains + depends_on), deduped by
    // (source, target, kind) keeping the maximum weight.
    let edges_written = upsert_edges(&tx, &node_ids, &input.edges)?;

    // Step 5: replace unresolved references for this workspace.
    let unresolved_written = replace_unresolved(&tx, workspace_id, &node_ids, input)?;

    // Step 6: stale cleanup.
    let nodes_deleted = stale_cleanup(&tx, workspace_id, &input.crawled_files)?;

    tx.commit().map_err(|e| ColonyError::fatal("graph", e))?;

    Ok(WriteSummary { workspace_id, nodes_written, edges_written, unresolved_written, nodes_deleted })
}

fn upsert_workspace(tx: &Connection, input: &GraphWriteInput) -> Result<i64> {
    tx.execute(
        "INSERT INTO workspaces (project_id, source_id, kind, package_manager, last_indexed_at)
         VALUES (?1, ?2, ?3, ?4, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
         ON CONFLICT(project_id, source_id) DO UPDATE SET
            kind = excluded.kind,
            package_manager = excluded.package_manager,
            last_indexed_at = excluded.last_indexed_at",
        params![
            input.project_id,
            input.source_id,
            input.workspace_kind.as_str(),
            package_manager_str(input.package_manager),
        ],
    )
    .map_err(|e| ColonyError::fatal("graph: workspace upsert", e))?;

    tx.query_row(
        "SELECT id FROM workspaces WHERE project_id = ?1 AND source_id = ?2",
        params![input.project_id, input.source_id],
        |row| row.get(0),
    )
    .map_err(|e| ColonyError::fatal("graph: workspace lookup", e))
}

fn package_manager_str(pm: model::workspace::PackageManager) -> &'static str {
    use model::workspace::PackageManager::*;
    match pm {
        None => "none",
        Npm => "npm",
        Yarn => "yarn",
        Pnpm => "pnpm",
        Go => "go",
    }
}

fn upsert_packages(tx: &Connection, workspace_id: i64, input: &GraphWriteInput) -> Result<Vec<Package>> {
    let mut out = Vec::with_capacity(input.packages.len());
    for pkg in &input.packages {
        tx.execute(
            "INSERT INTO packages (workspace_id, name, path, version, entry_point) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(workspace_id, name) DO UPDATE SET
                path = excluded.path, version = excluded.version, entry_point = excluded.entry_point",
            params![workspace_id, pkg.name, pkg.path, pkg.version, pkg.entry_point],
        )
        .map_err(|e| ColonyError::fatal("graph: package upsert", e))?;

        let id: i64 = tx
            .query_row(
                "SELECT id FROM packages WHERE workspace_id = ?1 AND name = ?2",
                params![workspace_id, pkg.name],
                |row| row.get(0),
            )
            .map_err(|e| ColonyError::fatal("graph: package lookup", e))?;

        out.push(Package {
            id,
            workspace_id,
            name: pkg.name.clone(),
            path: pkg.path.clone(),
            version: pkg.version.clone(),
            entry_point: pkg.entry_point.clone(),
        });
    }
    Ok(out)
}

/// C4's front ends extract symbols within a file but not the file itself
/// (§4.4); the writer synthesizes the file-scoped node that roots the
/// `contains` forest (I3), one per crawled file this run touched.
fn synthesize_file_nodes(input: &GraphWriteInput) -> Vec<NodeInput> {
    input
        .files
        .iter()
        .map(|f: &FileInput| NodeInput {
            file_path: f.file_path.clone(),
            name: f.file_path.rsplit('/').next().unwrap_or(&f.file_path).to_string(),
            qualified_name: f.file_path.clone(),
            kind: NodeKind::File,
            language: f.language.clone(),
            signature: String::new(),
            start_line: 1,
            end_line: f.source.lines().count().max(1) as u32,
            source: f.source.clone(),
            docstring: None,
            body_hash: body_hash(f.source.as_bytes()),
            embedding: None,
        })
        .collect()
}

fn upsert_node(tx: &Connection, workspace_id: i64, package_id: Option<i64>, node: &NodeInput) -> Result<i64> {
    let embedding_blob = node.embedding.as_deref().map(vector::encode);

    tx.execute(
        "INSERT INTO nodes (
            workspace_id, package_id, file_path, name, qualified_name, kind, language,
            signature, start_line, end_line, source, docstring, body_hash, embedding
         ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)
         ON CONFLICT(workspace_id, qualified_name) DO UPDATE SET
            package_id = excluded.package_id,
            file_path = excluded.file_path,
            name = excluded.name,
            kind = excluded.kind,
            language = excluded.language,
            signature = excluded.signature,
            start_line = excluded.start_line,
            end_line = excluded.end_line,
            source = excluded.source,
            docstring = excluded.docstring,
            body_hash = excluded.body_hash,
            embedding = excluded.embedding",
        params![
            workspace_id,
            package_id,
            node.file_path,
            node.name,
            node.qualified_name,
            node.kind.as_str(),
            node.language,
            node.signature,
            node.start_line,
            node.end_line,
            node.source,
            node.docstring,
            node.body_hash,
            embedding_blob,
        ],
    )
    .map_err(|e| ColonyError::fatal("graph: node upsert", e))?;

    let id: i64 = tx
        .query_row(
            "SELECT id FROM nodes WHERE workspace_id = ?1 AND qualified_name = ?2",
            params![workspace_id, node.qualified_name],
            |row| row.get(0),
        )
        .map_err(|e| ColonyError::fatal("graph: node lookup", e))?;

    // Keep the vector-index mirror table in sync (§6's vector-similarity
    // index). vec0 has no upsert; delete-then-insert.
    tx.execute("DELETE FROM nodes_vec WHERE rowid = ?1", params![id])
        .map_err(|e| ColonyError::fatal("graph: vec delete", e))?;
    if let Some(bytes) = &embedding_blob {
        tx.execute("INSERT INTO nodes_vec (rowid, embedding) VALUES (?1, ?2)", params![id, bytes])
            .map_err(|e| ColonyError::fatal("graph: vec insert", e))?;
    }

    Ok(id)
}

fn resolve_ref(node_ids: &HashMap<String, i64>, r: &NodeRef) -> Option<i64> {
    let key = if r.qualified_name.is_empty() { r.file_path.clone() } else { r.qualified_name.clone() };
    node_ids.get(&key).copied()
}

/// Deduplicates edges by `(source, target, kind)` keeping the maximum
/// weight (I7, §4.7 step 4) before writing, since a single `INSERT ...
/// RETURNING` can't express a max-aggregate across a batch.
fn upsert_edges(tx: &Connection, node_ids: &HashMap<String, i64>, edges: &[EdgeInput]) -> Result<usize> {
    let mut deduped: HashMap<(i64, i64, EdgeKind), (f64, Option<u32>)> = HashMap::new();
    for edge in edges {
        let Some(source_id) = resolve_ref(node_ids, &edge.source) else { continue };
        let Some(target_id) = resolve_ref(node_ids, &edge.target) else { continue };
        let entry = deduped.entry((source_id, target_id, edge.kind)).or_insert((edge.weight, edge.line));
        if edge.weight > entry.0 {
            *entry = (edge.weight, edge.line.or(entry.1));
        } else if entry.1.is_none() {
            entry.1 = edge.line;
        }
    }

    let mut written = 0;
    for ((source_id, target_id, kind), (weight, line)) in deduped {
        tx.execute(
            "INSERT INTO edges (source_id, target_id, kind, weight, line) VALUES (?1,?2,?3,?4,?5)
             ON CONFLICT(source_id, target_id, kind) DO UPDATE SET
                weight = MAX(weight, excluded.weight),
                line = COALESCE(edges.line, excluded.line)",
            params![source_id, target_id, kind.as_str(), weight, line],
        )
        .map_err(|e| ColonyError::fatal("graph: edge upsert", e))?;
        written += 1;
    }
    Ok(written)
}

fn replace_unresolved(
    tx: &Connection,
    workspace_id: i64,
    node_ids: &HashMap<String, i64>,
    input: &GraphWriteInput,
) -> Result<usize> {
    tx.execute("DELETE FROM unresolved_references WHERE workspace_id = ?1", params![workspace_id])
        .map_err(|e| ColonyError::fatal("graph: unresolved clear", e))?;

    let mut written = 0;
    for item in &input.unresolved {
        let Some(source_node_id) = resolve_ref(node_ids, &item.source) else { continue };
        tx.execute(
            "INSERT INTO unresolved_references (workspace_id, source_node_id, specifier, kind, line)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![workspace_id, source_node_id, item.specifier, item.kind.as_str(), item.line],
        )
        .map_err(|e| ColonyError::fatal("graph: unresolved insert", e))?;
        written += 1;
    }
    Ok(written)
}

/// Stale cleanup (§4.7 step 6): delete nodes in this workspace whose
/// `file_path` is not in the current crawl's file set. Edges and unresolved
/// references cascade via the foreign keys declared in the schema (I6). An
/// empty `crawled_files` means a full-workspace wipe.
fn stale_cleanup(tx: &Connection, workspace_id: i64, crawled_files: &[String]) -> Result<usize> {
    if crawled_files.is_empty() {
        return tx
            .execute("DELETE FROM nodes WHERE workspace_id = ?1", params![workspace_id])
            .map_err(|e| ColonyError::fatal("graph: stale cleanup", e));
    }

    let mut stmt = tx
        .prepare("SELECT id, file_path FROM nodes WHERE workspace_id = ?1")
        .map_err(|e| ColonyError::fatal("graph: stale cleanup scan", e))?;
    let present: std::collections::HashSet<&str> = crawled_files.iter().map(|s| s.as_str()).collect();
    let stale_ids: Vec<i64> = stmt
        .query_map(params![workspace_id], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
        .map_err(|e| ColonyError::fatal("graph: stale cleanup scan", e))?
        .filter_map(|r| r.ok())
        .filter(|(_, path)| !present.contains(path.as_str()))
        .map(|(id, _)| id)
        .collect();
    drop(stmt);

    let mut deleted = 0;
    for id in stale_ids {
        tx.execute("DELETE FROM nodes WHERE id = ?1", params![id])
            .map_err(|e| ColonyError::fatal("graph: stale cleanup delete", e))?;
        deleted += 1;
    }
    Ok(deleted)
}

/// Looks up a node id by qualified name within a workspace, used by callers
/// assembling `EdgeInput`/`UnresolvedInput` that reference nodes written in
/// a prior batch of the same transaction plan (tests and C8 both need this).
pub fn find_node_id(conn: &Connection, workspace_id: i64, qualified_name: &str) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM nodes WHERE workspace_id = ?1 AND qualified_name = ?2",
        params![workspace_id, qualified_name],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| ColonyError::fatal("graph: node lookup", e))
}
