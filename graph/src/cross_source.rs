//! C8 Cross-Source Resolver (§4.8): after every source in a project is
//! indexed, links each remaining unresolved `imports` reference to a node
//! in a sibling source's workspace of the same project.

use std::collections::HashSet;

use common::error::{ColonyError, Result};
use model::edge::EdgeKind;
use rusqlite::{Connection, OptionalExtension, params};

const TS_JS_EXTS: [&str; 4] = ["ts", "tsx", "js", "jsx"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrossSourceSummary {
    pub edges_created: usize,
    pub unresolved_removed: usize,
}

struct UnresolvedRow {
    id: i64,
    workspace_id: i64,
    source_node_id: i64,
    specifier: String,
}

struct PackageRow {
    workspace_id: i64,
    name: String,
    path: String,
    entry_point: Option<String>,
}

/// Runs the post-pass once per project (§4.8). Idempotent: a rerun finds no
/// remaining unresolved `imports` references to act on.
pub fn resolve_cross_source(conn: &mut Connection, project_id: i64) -> Result<CrossSourceSummary> {
    let tx = conn.transaction().map_err(|e| ColonyError::fatal("cross-source resolution", e))?;

    let unresolved = load_unresolved_imports(&tx, project_id)?;
    let packages = load_packages(&tx, project_id)?;

    let mut summary = CrossSourceSummary::default();

    for item in unresolved {
        let (package_name, subpath) = split_specifier(&item.specifier);

        let Some(target_package) =
            packages.iter().find(|p| p.name == package_name && p.workspace_id != item.workspace_id)
        else {
            continue;
        };

        let Some(target_node_id) = resolve_target_node(&tx, target_package, subpath.as_deref())? else {
            continue;
        };

        tx.execute(
            "INSERT INTO edges (source_id, target_id, kind, weight, line) VALUES (?1, ?2, ?3, 0.5, NULL)
             ON CONFLICT(source_id, target_id, kind) DO UPDATE SET weight = MAX(weight, excluded.weight)",
            params![item.source_node_id, target_node_id, EdgeKind::Imports.as_str()],
        )
        .map_err(|e| ColonyError::fatal("cross-source resolution", e))?;
        summary.edges_created += 1;

        tx.execute("DELETE FROM unresolved_references WHERE id = ?1", params![item.id])
            .map_err(|e| ColonyError::fatal("cross-source resolution", e))?;
        summary.unresolved_removed += 1;
    }

    tx.commit().map_err(|e| ColonyError::fatal("cross-source resolution", e))?;
    Ok(summary)
}

fn load_unresolved_imports(conn: &Connection, project_id: i64) -> Result<Vec<UnresolvedRow>> {
    let mut stmt = conn
        .prepare(
            "SELECT ur.id, ur.workspace_id, ur.source_node_id, ur.specifier
             FROM unresolved_references ur
             JOIN workspaces w ON ur.workspace_id = w.id
             WHERE w.project_id = ?1 AND ur.kind = ?2",
        )
        .map_err(|e| ColonyError::fatal("cross-source resolution", e))?;
    let rows = stmt
        .query_map(params![project_id, EdgeKind::Imports.as_str()], |row| {
            Ok(UnresolvedRow {
                id: row.get(0)?,
                workspace_id: row.get(1)?,
                source_node_id: row.get(2)?,
                specifier: row.get(3)?,
            })
        })
        .map_err(|e| ColonyError::fatal("cross-source resolution", e))?;
    rows.collect::<std::result::Result<_, _>>().map_err(|e| ColonyError::fatal("cross-source resolution", e))
}

fn load_packages(conn: &Connection, project_id: i64) -> Result<Vec<PackageRow>> {
    let mut stmt = conn
        .prepare(
            "SELECT p.workspace_id, p.name, p.path, p.entry_point
             FROM packages p
             JOIN workspaces w ON p.workspace_id = w.id
             WHERE w.project_id = ?1",
        )
        .map_err(|e| ColonyError::fatal("cross-source resolution", e))?;
    let rows = stmt
        .query_map(params![project_id], |row| {
            Ok(PackageRow {
                workspace_id: row.get(0)?,
                name: row.get(1)?,
                path: row.get(2)?,
                entry_point: row.get(3)?,
            })
        })
        .map_err(|e| ColonyError::fatal("cross-source resolution", e))?;
    rows.collect::<std::result::Result<_, _>>().map_err(|e| ColonyError::fatal("cross-source resolution", e))
}

/// Splits an import specifier into `(packageName, subpath)` (§4.8): scoped
/// packages (`@scope/name`) use the first two segments as the package name;
/// unscoped packages use the first segment only.
fn split_specifier(specifier: &str) -> (String, Option<String>) {
    let parts: Vec<&str> = specifier.split('/').filter(|s| !s.is_empty()).collect();
    if specifier.starts_with('@') && parts.len() >= 2 {
        let name = format!("{}/{}", parts[0], parts[1]);
        let subpath = if parts.len() > 2 { Some(parts[2..].join("/")) } else { None };
        (name, subpath)
    } else {
        let name = parts.first().copied().unwrap_or(specifier).to_string();
        let subpath = if parts.len() > 1 { Some(parts[1..].join("/")) } else { None };
        (name, subpath)
    }
}

/// Target node resolution (§4.8): the entry point's first node when no
/// subpath is given; a subpath-matched file (extension-probed) under the
/// package path otherwise; a final path-substring fallback.
fn resolve_target_node(conn: &Connection, package: &PackageRow, subpath: Option<&str>) -> Result<Option<i64>> {
    if let Some(subpath) = subpath {
        let base = format!("{}/{}", package.path.trim_end_matches('/'), subpath);
        if let Some(file_path) = probe_extensions(conn, package.workspace_id, &base)? {
            return first_node_in_file(conn, package.workspace_id, &file_path);
        }
        if let Some(file_path) = substring_match(conn, package.workspace_id, subpath)? {
            return first_node_in_file(conn, package.workspace_id, &file_path);
        }
        return Ok(None);
    }

    match &package.entry_point {
        Some(entry) => first_node_in_file(conn, package.workspace_id, entry),
        None => Ok(None),
    }
}

fn file_exists(conn: &Connection, workspace_id: i64, file_path: &str) -> Result<bool> {
    conn.query_row(
        "SELECT 1 FROM nodes WHERE workspace_id = ?1 AND file_path = ?2 LIMIT 1",
        params![workspace_id, file_path],
        |_| Ok(()),
    )
    .optional()
    .map(|r| r.is_some())
    .map_err(|e| ColonyError::fatal("cross-source resolution", e))
}

fn probe_extensions(conn: &Connection, workspace_id: i64, base: &str) -> Result<Option<String>> {
    if file_exists(conn, workspace_id, base)? {
        return Ok(Some(base.to_string()));
    }
    for ext in TS_JS_EXTS {
        let candidate = format!("{base}.{ext}");
        if file_exists(conn, workspace_id, &candidate)? {
            return Ok(Some(candidate));
        }
    }
    for ext in TS_JS_EXTS {
        let candidate = format!("{base}/index.{ext}");
        if file_exists(conn, workspace_id, &candidate)? {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

fn substring_match(conn: &Connection, workspace_id: i64, subpath: &str) -> Result<Option<String>> {
    let mut stmt = conn
        .prepare("SELECT DISTINCT file_path FROM nodes WHERE workspace_id = ?1")
        .map_err(|e| ColonyError::fatal("cross-source resolution", e))?;
    let paths: HashSet<String> = stmt
        .query_map(params![workspace_id], |row| row.get::<_, String>(0))
        .map_err(|e| ColonyError::fatal("cross-source resolution", e))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(paths.into_iter().find(|p| p.contains(subpath)))
}

fn first_node_in_file(conn: &Connection, workspace_id: i64, file_path: &str) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM nodes WHERE workspace_id = ?1 AND file_path = ?2 ORDER BY start_line ASC LIMIT 1",
        params![workspace_id, file_path],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| ColonyError::fatal("cross-source resolution", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_scoped_specifier() {
        assert_eq!(split_specifier("@test/utils"), ("@test/utils".to_string(), None));
        assert_eq!(
            split_specifier("@test/utils/format"),
            ("@test/utils".to_string(), Some("format".to_string()))
        );
    }

    #[test]
    fn splits_unscoped_specifier() {
        assert_eq!(split_specifier("lodash"), ("lodash".to_string(), None));
        assert_eq!(split_specifier("lodash/merge"), ("lodash".to_string(), Some("merge".to_string())));
    }
}
