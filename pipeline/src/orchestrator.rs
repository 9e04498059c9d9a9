//! C9 Pipeline Orchestrator (§4.9): sequences C1→C7 per source, then C8
//! once per project; maintains job status and per-project mutual exclusion.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use common::Config;
use common::error::{ColonyError, Result};
use detect::{ChangeDetector, ChangeSet, FileCrawler, WorkspaceDetector};
use embed::EmbeddingClient;
use parking_lot::Mutex;
use parse::resolver::{self, FileRecord};
use rusqlite::{Connection, OptionalExtension, params};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::status::{JobState, JobStatus, StatusStore};

/// One source's indexing parameters (the orchestrator's view of a `Source`
/// row, §3): watermarks read in, not yet written back.
#[derive(Debug, Clone)]
pub struct SourceInput {
    pub source_id: i64,
    pub path: PathBuf,
    pub is_code: bool,
    pub previous_commit: Option<String>,
    pub previous_indexed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceRunOutcome {
    pub source_id: i64,
    pub skipped: bool,
    pub write_summary: Option<graph::WriteSummary>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSummary {
    pub sources: Vec<SourceRunOutcome>,
    pub cross_source: Option<graph::CrossSourceSummary>,
}

/// Owns the two process-wide singletons of §9: the job-status map and the
/// per-project mutual-exclusion set.
#[derive(Default)]
pub struct Orchestrator {
    status: StatusStore,
    running: Mutex<HashSet<i64>>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, project_id: i64) -> Option<JobStatus> {
        self.status.get(project_id)
    }

    /// Runs the full pipeline for `project_id`'s sources. Returns
    /// `Err(Conflict)` immediately if a job is already running for this
    /// project (§4.9, §5) without touching the database.
    #[instrument(skip(self, conn, sources, client, config, cancel), fields(project_id))]
    #[allow(clippy::too_many_arguments)]
    pub async fn trigger_index(
        &self,
        conn: &mut Connection,
        project_id: i64,
        sources: &[SourceInput],
        client: &dyn EmbeddingClient,
        config: &Config,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<IndexSummary> {
        {
            let mut running = self.running.lock();
            if running.contains(&project_id) {
                return Err(ColonyError::Conflict(format!(
                    "index job already running for project {project_id}"
                )));
            }
            running.insert(project_id);
        }

        let job_id = format!("job-{project_id}-{}", Utc::now().timestamp_micros());
        self.status.insert(JobStatus::new(job_id, project_id, Utc::now()));

        let result = run_project_index(conn, project_id, sources, client, config, force, cancel, |done, total, stage| {
            self.status.update(project_id, |status| {
                status.stage = stage.to_string();
                status.progress = if total == 0 { 1.0 } else { done as f32 / total as f32 };
            });
        })
        .await;

        self.running.lock().remove(&project_id);

        match result {
            Ok(summary) => {
                self.status.update(project_id, |status| {
                    status.status = JobState::Completed;
                    status.stage = "done".to_string();
                    status.progress = 1.0;
                    status.done_at = Some(Utc::now());
                    status.result = Some(summary.clone());
                });
                Ok(summary)
            }
            Err(e) => {
                self.status.update(project_id, |status| {
                    status.status = JobState::Failed;
                    status.done_at = Some(Utc::now());
                    status.error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }
}

/// Runs C1→C7 for each source in order, collecting per-source errors rather
/// than aborting the project (§4.9, §7 "Partial-source failure" analog at
/// the source level), then C8 once.
#[allow(clippy::too_many_arguments)]
async fn run_project_index(
    conn: &mut Connection,
    project_id: i64,
    sources: &[SourceInput],
    client: &dyn EmbeddingClient,
    config: &Config,
    force: bool,
    cancel: &CancellationToken,
    mut on_progress: impl FnMut(usize, usize, &str),
) -> Result<IndexSummary> {
    let total = sources.len();
    let mut outcomes = Vec::with_capacity(total);

    for (idx, source) in sources.iter().enumerate() {
        on_progress(idx, total, "indexing source");
        let outcome = match run_source(conn, project_id, source, client, config, force, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(source_id = source.source_id, error = %e, "source indexing failed, continuing with remaining sources");
                SourceRunOutcome { source_id: source.source_id, skipped: false, write_summary: None, error: Some(e.to_string()) }
            }
        };
        outcomes.push(outcome);
    }

    on_progress(total, total, "cross-source resolution");
    let cross_source = graph::resolve_cross_source(conn, project_id)?;

    Ok(IndexSummary { sources: outcomes, cross_source: Some(cross_source) })
}

/// Runs C1→C7 for a single source (§4.1–§4.7).
async fn run_source(
    conn: &mut Connection,
    project_id: i64,
    source: &SourceInput,
    client: &dyn EmbeddingClient,
    config: &Config,
    force: bool,
    cancel: &CancellationToken,
) -> Result<SourceRunOutcome> {
    let detector = ChangeDetector::new(config.max_auto_reindex_files);
    let change = detector.detect(&source.path, source.previous_commit.as_deref(), source.previous_indexed_at, force)?;

    if change.threshold_exceeded && !force {
        return Ok(SourceRunOutcome {
            source_id: source.source_id,
            skipped: true,
            write_summary: None,
            error: Some(format!(
                "change count {} exceeds max_auto_reindex_files ({}); rerun with force",
                change.changed_count(),
                config.max_auto_reindex_files
            )),
        });
    }

    if change.is_no_change() {
        return Ok(SourceRunOutcome { source_id: source.source_id, skipped: true, write_summary: None, error: None });
    }

    let workspace_info = WorkspaceDetector::detect(&source.path);
    let crawl = FileCrawler::new(source.is_code, None).crawl(&source.path)?;
    let crawled_files: Vec<String> = crawl.files.iter().map(|f| f.rel_path.clone()).collect();
    let file_set: HashSet<String> = crawled_files.iter().cloned().collect();

    let to_parse: Vec<String> = if change.is_full_index {
        crawled_files.clone()
    } else {
        let mut changed: Vec<String> = change.added.iter().chain(change.modified.iter()).cloned().collect();
        changed.retain(|p| file_set.contains(p));
        changed
    };

    let mut file_records: Vec<FileRecord> = Vec::new();
    let mut file_inputs: Vec<graph::FileInput> = Vec::new();
    for rel_path in &to_parse {
        let abs_path = source.path.join(rel_path);
        let bytes = match std::fs::read(&abs_path) {
            Ok(b) => b,
            Err(e) => {
                warn!(file = %rel_path, error = %e, "skipping file: read failed");
                continue;
            }
        };
        let ext = rel_path.rsplit('.').next().unwrap_or("");
        let parsed = match parse::parse_file(ext, &bytes) {
            Some(Ok(p)) => p,
            Some(Err(e)) => {
                warn!(file = %rel_path, error = %e, "skipping file: parse failed");
                continue;
            }
            None => continue,
        };
        file_inputs.push(graph::FileInput {
            file_path: rel_path.clone(),
            language: language_tag(ext).to_string(),
            source: String::from_utf8_lossy(&bytes).into_owned(),
        });
        file_records.push(FileRecord { file_path: rel_path.clone(), parsed });
    }

    let package_entries: Vec<resolver::PackageEntry> = workspace_info
        .packages
        .iter()
        .map(|p| resolver::PackageEntry { name: p.name.clone(), root: p.path.clone(), entry_point: p.entry_point.clone() })
        .collect();

    let resolver_input = resolver::ResolverInput {
        files: &file_records,
        alias_map: &workspace_info.alias_map,
        packages: &package_entries,
        tsconfig_paths: &workspace_info.tsconfig_paths,
        file_set: &file_set,
    };
    let resolved_output = resolver::resolve(&resolver_input);

    let workspace_id = find_workspace_id(conn, project_id, source.source_id)?;
    let stored_hashes = match workspace_id {
        Some(id) => graph::reader::fetch_body_hashes(conn, id)?,
        None => HashMap::new(),
    };
    let stored_vectors = match workspace_id {
        Some(id) => graph::reader::fetch_vectors(conn, id)?,
        None => HashMap::new(),
    };

    let candidates: Vec<embed::Candidate> = file_records
        .iter()
        .flat_map(|f| f.parsed.nodes.iter())
        .map(|n| embed::Candidate {
            qualified_name: n.qualified_name.clone(),
            body_hash: n.body_hash.clone(),
            signature: n.signature.clone(),
            docstring: n.docstring.clone(),
            source: n.source.clone(),
        })
        .collect();

    // §6: an unset API key degrades embedding gracefully rather than
    // failing the pipeline — nodes are written without a vector.
    let embeddings: HashMap<String, Vec<f32>> = if config.has_embedding_provider() && !candidates.is_empty() {
        let outcomes = embed::embed_candidates(
            candidates,
            &stored_hashes,
            &stored_vectors,
            client,
            config.max_embedding_batch,
            cancel,
            |_, _| {},
        )
        .await?;
        outcomes.into_iter().map(|o| (o.qualified_name, o.embedding)).collect()
    } else {
        HashMap::new()
    };

    let nodes: Vec<graph::NodeInput> = file_records
        .iter()
        .flat_map(|f| f.parsed.nodes.iter().map(move |n| (f.file_path.clone(), n)))
        .map(|(file_path, n)| graph::NodeInput {
            file_path,
            name: n.name.clone(),
            qualified_name: n.qualified_name.clone(),
            kind: n.kind,
            language: n.language.clone(),
            signature: n.signature.clone(),
            start_line: n.start_line,
            end_line: n.end_line,
            source: n.source.clone(),
            docstring: n.docstring.clone(),
            body_hash: n.body_hash.clone(),
            embedding: embeddings.get(&n.qualified_name).cloned(),
        })
        .collect();

    let edges: Vec<graph::EdgeInput> = resolved_output
        .resolved
        .iter()
        .map(|e| graph::EdgeInput {
            source: e.source.clone(),
            kind: e.kind,
            target: e.target.clone(),
            weight: e.kind.default_weight(),
            line: e.line,
        })
        .collect();

    let unresolved: Vec<graph::UnresolvedInput> = resolved_output
        .unresolved
        .iter()
        .map(|e| graph::UnresolvedInput { source: e.source.clone(), specifier: e.specifier.clone(), kind: e.kind, line: e.line })
        .collect();

    let packages: Vec<graph::PackageInput> = workspace_info
        .packages
        .iter()
        .map(|p| graph::PackageInput { name: p.name.clone(), path: p.path.clone(), version: p.version.clone(), entry_point: p.entry_point.clone() })
        .collect();

    let write_input = graph::GraphWriteInput {
        project_id,
        source_id: source.source_id,
        workspace_kind: workspace_info.workspace_type.into(),
        package_manager: workspace_info.package_manager,
        packages,
        files: file_inputs,
        nodes,
        edges,
        unresolved,
        crawled_files,
    };

    let write_summary = graph::write(conn, &write_input)?;
    write_back_watermarks(conn, source.source_id, &change)?;

    Ok(SourceRunOutcome { source_id: source.source_id, skipped: false, write_summary: Some(write_summary), error: None })
}

fn find_workspace_id(conn: &Connection, project_id: i64, source_id: i64) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM workspaces WHERE project_id = ?1 AND source_id = ?2",
        params![project_id, source_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| ColonyError::fatal("pipeline", e))
}

fn write_back_watermarks(conn: &Connection, source_id: i64, change: &ChangeSet) -> Result<()> {
    conn.execute(
        "UPDATE sources SET last_indexed_commit = ?1, last_indexed_branch = ?2,
         last_indexed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?3",
        params![change.current_commit, change.current_branch, source_id],
    )
    .map_err(|e| ColonyError::fatal("pipeline", e))?;
    Ok(())
}

fn language_tag(ext: &str) -> &'static str {
    match ext {
        "ts" | "tsx" => "typescript",
        "js" | "jsx" => "javascript",
        "go" => "go",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use async_trait::async_trait;
    use graph::db;

    struct StubEmbeddingClient;

    #[async_trait]
    impl EmbeddingClient for StubEmbeddingClient {
        async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(inputs.iter().map(|_| vec![0.1_f32; 1536]).collect())
        }
    }

    fn seed_project(conn: &Connection, alias: &str) -> (i64, i64) {
        conn.execute("INSERT INTO projects (name) VALUES ('p')", []).unwrap();
        let project_id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO sources (project_id, path, alias, is_code) VALUES (?1, '', ?2, 1)",
            params![project_id, alias],
        )
        .unwrap();
        let source_id = conn.last_insert_rowid();
        (project_id, source_id)
    }

    #[tokio::test]
    async fn full_index_of_a_single_file_writes_nodes_and_resolves_cross_source() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "export function greet() {\n  return 1;\n}\n").unwrap();

        let mut conn = db::open_in_memory().unwrap();
        let (project_id, source_id) = seed_project(&conn, "main");

        let source_input = SourceInput {
            source_id,
            path: dir.path().to_path_buf(),
            is_code: true,
            previous_commit: None,
            previous_indexed_at: None,
        };

        let orchestrator = Orchestrator::new();
        let config = Config::default();
        let client = StubEmbeddingClient;
        let cancel = CancellationToken::new();

        let summary = orchestrator
            .trigger_index(&mut conn, project_id, &[source_input], &client, &config, false, &cancel)
            .await
            .unwrap();

        assert_eq!(summary.sources.len(), 1);
        let outcome = &summary.sources[0];
        assert!(outcome.error.is_none());
        let write_summary = outcome.write_summary.as_ref().expect("first run is a full index");
        assert!(write_summary.nodes_written >= 1);
        assert!(summary.cross_source.is_some());

        let status = orchestrator.status(project_id).unwrap();
        assert_eq!(status.status, JobState::Completed);
        assert_eq!(status.progress, 1.0);
    }

    #[tokio::test]
    async fn rerun_with_no_changes_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "export function greet() {}\n").unwrap();

        let mut conn = db::open_in_memory().unwrap();
        let (project_id, source_id) = seed_project(&conn, "main");
        let config = Config::default();
        let client = StubEmbeddingClient;
        let cancel = CancellationToken::new();

        let source_input = SourceInput {
            source_id,
            path: dir.path().to_path_buf(),
            is_code: true,
            previous_commit: None,
            previous_indexed_at: None,
        };

        let orchestrator = Orchestrator::new();
        orchestrator
            .trigger_index(&mut conn, project_id, std::slice::from_ref(&source_input), &client, &config, false, &cancel)
            .await
            .unwrap();

        // Re-read the watermark the first run wrote back, then rerun.
        let (previous_commit, previous_indexed_at) = {
            let row: (Option<String>, Option<String>) = conn
                .query_row(
                    "SELECT last_indexed_commit, last_indexed_at FROM sources WHERE id = ?1",
                    params![source_id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .unwrap();
            (row.0, row.1.map(|s| s.parse().unwrap()))
        };
        let rerun_input = SourceInput { previous_commit, previous_indexed_at, ..source_input };

        let second = orchestrator
            .trigger_index(&mut conn, project_id, &[rerun_input], &client, &config, false, &cancel)
            .await
            .unwrap();

        assert!(second.sources[0].skipped);
        assert!(second.sources[0].write_summary.is_none());
    }

    fn init_repo(dir: &std::path::Path) -> git2::Repository {
        let repo = git2::Repository::init(dir).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();
        repo
    }

    fn commit_all(repo: &git2::Repository, message: &str) -> String {
        let mut index = repo.index().unwrap();
        index.add_all(["."], git2::IndexAddOption::DEFAULT, None).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = repo.signature().unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents).unwrap().to_string()
    }

    /// §8 boundary scenario 1 ("Incremental modify"), driven through a real
    /// git repository rather than the mtime fallback.
    #[tokio::test]
    async fn modifying_a_function_body_rewrites_the_same_node_and_its_embedding() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "export function foo() {\n  return 1;\n}\n").unwrap();
        let repo = init_repo(dir.path());
        let first_commit = commit_all(&repo, "initial");

        let mut conn = db::open_in_memory().unwrap();
        let (project_id, source_id) = seed_project(&conn, "main");
        let config = Config::default();
        let client = StubEmbeddingClient;
        let cancel = CancellationToken::new();
        let orchestrator = Orchestrator::new();

        let first_source = SourceInput {
            source_id,
            path: dir.path().to_path_buf(),
            is_code: true,
            previous_commit: None,
            previous_indexed_at: None,
        };
        let first = orchestrator
            .trigger_index(&mut conn, project_id, &[first_source], &client, &config, false, &cancel)
            .await
            .unwrap();
        let first_write = first.sources[0].write_summary.as_ref().unwrap();
        assert_eq!(first_write.nodes_written, 2); // the file node plus `foo`

        let node_id_before: i64 = conn
            .query_row("SELECT id FROM nodes WHERE qualified_name = 'foo'", [], |r| r.get(0))
            .unwrap();
        let hash_before: String =
            conn.query_row("SELECT body_hash FROM nodes WHERE id = ?1", params![node_id_before], |r| r.get(0)).unwrap();

        fs::write(dir.path().join("a.ts"), "export function foo() {\n  return 2;\n}\n").unwrap();
        let second_commit = commit_all(&repo, "modify foo");
        assert_ne!(first_commit, second_commit);

        let second_source = SourceInput {
            source_id,
            path: dir.path().to_path_buf(),
            is_code: true,
            previous_commit: Some(first_commit),
            previous_indexed_at: None,
        };
        orchestrator
            .trigger_index(&mut conn, project_id, &[second_source], &client, &config, false, &cancel)
            .await
            .unwrap();

        let node_id_after: i64 =
            conn.query_row("SELECT id FROM nodes WHERE qualified_name = 'foo'", [], |r| r.get(0)).unwrap();
        let hash_after: String =
            conn.query_row("SELECT body_hash FROM nodes WHERE id = ?1", params![node_id_after], |r| r.get(0)).unwrap();

        assert_eq!(node_id_before, node_id_after, "the same node is updated in place, not recreated");
        assert_ne!(hash_before, hash_after, "body hash changes when the function body changes");

        let node_count: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |r| r.get(0)).unwrap();
        assert_eq!(node_count, 2, "no spurious nodes are created on reindex");
    }

    #[tokio::test]
    async fn concurrent_trigger_for_the_same_project_is_rejected() {
        let mut conn = db::open_in_memory().unwrap();
        let (project_id, _source_id) = seed_project(&conn, "main");

        let orchestrator = Orchestrator::new();
        orchestrator.running.lock().insert(project_id);

        let config = Config::default();
        let client = StubEmbeddingClient;
        let cancel = CancellationToken::new();

        let result = orchestrator.trigger_index(&mut conn, project_id, &[], &client, &config, false, &cancel).await;

        match result {
            Err(ColonyError::Conflict(_)) => {}
            other => panic!("expected Conflict, got {other:?}"),
        }
    }
}
