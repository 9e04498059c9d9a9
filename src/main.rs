//! Thin CLI front end over the engine's crates. Stands in for the
//! out-of-scope HTTP front controller (SPEC_FULL.md §5): one subcommand per
//! API surface, all against a single SQLite database file.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use common::Config;
use common::error::{ColonyError, Result};
use embed::{EmbeddingClient, OpenAiEmbeddingClient};
use pipeline::{Orchestrator, SourceInput};
use rusqlite::{Connection, OptionalExtension, params};
use search::HybridSearchOptions;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(version, about = "Local code-intelligence engine: index, search, and assemble chat context over a code graph.")]
struct Args {
    /// SQLite database file. Created (with schema applied) if it doesn't exist.
    #[arg(long, global = true, default_value = "colony.db")]
    db: PathBuf,

    /// Project name; a project is created on first use.
    #[arg(long, global = true, default_value = "default")]
    project: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index (or re-index) one source directory into the project's graph.
    Index {
        /// Path to the source tree to index.
        path: PathBuf,
        /// Label distinguishing this source within the project (e.g. a repo name).
        #[arg(long, default_value = "main")]
        alias: String,
        /// Treat every file as changed, ignoring the `ChangeDetector` watermark.
        #[arg(long)]
        force: bool,
        /// Crawl every file, not just recognized source-code extensions.
        #[arg(long)]
        all_files: bool,
    },
    /// Hybrid (vector + keyword) search over the project's nodes.
    Search {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Assemble a token-budgeted context block for a chat query (C12).
    Context {
        query: String,
        #[arg(long)]
        max_tokens: Option<usize>,
    },
    /// Incoming `calls` edges for a qualified name.
    Callers { qualified_name: String },
    /// Outgoing `calls` edges for a qualified name.
    Callees { qualified_name: String },
    /// Incoming `imports` edges for a qualified name.
    Importers { qualified_name: String },
    /// Outgoing `imports` edges for a qualified name.
    Imports { qualified_name: String },
    /// Transitive dependency closure for a qualified name.
    Dependencies { qualified_name: String, #[arg(long)] depth: Option<u32> },
    /// Transitive dependent closure for a qualified name.
    Dependents { qualified_name: String, #[arg(long)] depth: Option<u32> },
    /// Every node defined in a given file.
    File { path: String },
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    common::logging::init();
    let args = Args::parse();

    let db_path = args.db.to_string_lossy().into_owned();
    let mut conn = graph::db::open(&db_path)?;
    let project_id = ensure_project(&conn, &args.project)?;
    let config = common::get_config();
    let client = build_embedding_client(&config);

    match args.command {
        Command::Index { path, alias, force, all_files } => {
            run_index(&mut conn, project_id, path, alias, force, all_files, &*client, &config).await?;
        }
        Command::Search { query, limit } => {
            let results = search::hybrid_search(
                &conn,
                &*client,
                HybridSearchOptions { project_id, query: &query, limit, kind_filter: None },
            )
            .await?;
            for r in results {
                println!("{:>6.3}  {:<10} {}  ({})", r.similarity, r.kind.as_str(), r.qualified_name, r.file_path);
            }
        }
        Command::Context { query, max_tokens } => {
            let block = search::assemble_context(&conn, &*client, project_id, &query, max_tokens).await?;
            println!("{}", block.text);
            eprintln!("-- {} / {} tokens, {} nodes", block.token_count, block.max_tokens, block.nodes.len());
        }
        Command::Callers { qualified_name } => {
            print_structural(&conn, project_id, &qualified_name, |c, id| search::structural::callers(c, id, None))?
        }
        Command::Callees { qualified_name } => {
            print_structural(&conn, project_id, &qualified_name, |c, id| search::structural::callees(c, id, None))?
        }
        Command::Importers { qualified_name } => {
            print_structural(&conn, project_id, &qualified_name, |c, id| search::structural::importers(c, id, None))?
        }
        Command::Imports { qualified_name } => {
            print_structural(&conn, project_id, &qualified_name, |c, id| search::structural::imports(c, id, None))?
        }
        Command::Dependencies { qualified_name, depth } => {
            print_structural(&conn, project_id, &qualified_name, |c, id| search::structural::dependencies(c, id, depth, None))?
        }
        Command::Dependents { qualified_name, depth } => {
            print_structural(&conn, project_id, &qualified_name, |c, id| search::structural::dependents(c, id, depth, None))?
        }
        Command::File { path } => {
            let nodes = search::structural::file(&conn, project_id, &path)?;
            for n in nodes {
                println!("{:<10} {:<40} {}", n.kind.as_str(), n.qualified_name, n.signature);
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_index(
    conn: &mut Connection,
    project_id: i64,
    path: PathBuf,
    alias: String,
    force: bool,
    code_only: bool,
    client: &dyn EmbeddingClient,
    config: &Config,
) -> Result<()> {
    let source_id = ensure_source(conn, project_id, &path, &alias, !code_only)?;
    let (previous_commit, previous_indexed_at) = source_watermarks(conn, source_id)?;

    let source_input = SourceInput {
        source_id,
        path,
        is_code: !code_only,
        previous_commit,
        previous_indexed_at,
    };

    let orchestrator = Orchestrator::new();
    let cancel = CancellationToken::new();
    let summary = orchestrator
        .trigger_index(conn, project_id, std::slice::from_ref(&source_input), client, config, force, &cancel)
        .await?;

    for outcome in &summary.sources {
        if let Some(write_summary) = &outcome.write_summary {
            println!(
                "source {}: {} nodes written, {} edges written, {} nodes deleted",
                outcome.source_id, write_summary.nodes_written, write_summary.edges_written, write_summary.nodes_deleted
            );
        } else if outcome.skipped {
            println!("source {}: skipped ({})", outcome.source_id, outcome.error.as_deref().unwrap_or("no change"));
        } else {
            println!("source {}: failed ({})", outcome.source_id, outcome.error.as_deref().unwrap_or("unknown error"));
        }
    }
    if let Some(cross) = &summary.cross_source {
        println!("cross-source: {} edges created, {} unresolved removed", cross.edges_created, cross.unresolved_removed);
    }

    Ok(())
}

fn print_structural(
    conn: &Connection,
    project_id: i64,
    qualified_name: &str,
    query: impl FnOnce(&Connection, i64) -> Result<Vec<search::NodeResult>>,
) -> Result<()> {
    let node = search::structural::find_by_qualified_name(conn, project_id, qualified_name, None)?
        .ok_or_else(|| ColonyError::NotFound(format!("no node named {qualified_name}")))?;
    let results = query(conn, node.node_id)?;
    for r in results {
        match r.depth {
            Some(d) => println!("{:<10} {}  (depth {})", r.kind.as_str(), r.qualified_name, d),
            None => println!("{:<10} {}", r.kind.as_str(), r.qualified_name),
        }
    }
    Ok(())
}

fn ensure_project(conn: &Connection, name: &str) -> Result<i64> {
    if let Some(id) = conn
        .query_row("SELECT id FROM projects WHERE name = ?1", params![name], |row| row.get(0))
        .optional()
        .map_err(|e| ColonyError::fatal("cli", e))?
    {
        return Ok(id);
    }
    conn.execute("INSERT INTO projects (name) VALUES (?1)", params![name]).map_err(|e| ColonyError::fatal("cli", e))?;
    Ok(conn.last_insert_rowid())
}

fn ensure_source(conn: &Connection, project_id: i64, path: &std::path::Path, alias: &str, is_code: bool) -> Result<i64> {
    let path_str = path.to_string_lossy().into_owned();
    if let Some(id) = conn
        .query_row(
            "SELECT id FROM sources WHERE project_id = ?1 AND alias = ?2",
            params![project_id, alias],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| ColonyError::fatal("cli", e))?
    {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO sources (project_id, path, alias, is_code) VALUES (?1, ?2, ?3, ?4)",
        params![project_id, path_str, alias, is_code],
    )
    .map_err(|e| ColonyError::fatal("cli", e))?;
    Ok(conn.last_insert_rowid())
}

fn source_watermarks(conn: &Connection, source_id: i64) -> Result<(Option<String>, Option<chrono::DateTime<chrono::Utc>>)> {
    conn.query_row(
        "SELECT last_indexed_commit, last_indexed_at FROM sources WHERE id = ?1",
        params![source_id],
        |row| {
            let commit: Option<String> = row.get(0)?;
            let indexed_at: Option<String> = row.get(1)?;
            Ok((commit, indexed_at))
        },
    )
    .map_err(|e| ColonyError::fatal("cli", e))
    .map(|(commit, indexed_at)| {
        let parsed = indexed_at.and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&chrono::Utc));
        (commit, parsed)
    })
}

fn build_embedding_client(config: &Config) -> Box<dyn EmbeddingClient> {
    match &config.open_ai_api_key {
        Some(key) => Box::new(OpenAiEmbeddingClient::new(key.clone(), config.embedding_model.clone())),
        None => Box::new(NullEmbeddingClient),
    }
}

/// Stands in when no API key is configured (§6): every embed call fails
/// with `ServiceUnavailable`, which the pipeline and search surfaces treat
/// as "skip embeddings, keep lexical search working."
struct NullEmbeddingClient;

#[async_trait::async_trait]
impl EmbeddingClient for NullEmbeddingClient {
    async fn embed_batch(&self, _inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(ColonyError::ServiceUnavailable("no OPENAI_API_KEY configured".to_string()))
    }
}
