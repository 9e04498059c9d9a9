//! C10 Hybrid Search (§4.10): fuses a vector branch and a keyword branch by
//! reciprocal-rank fusion (constant 60).

use std::collections::HashMap;

use common::error::{ColonyError, Result};
use embed::EmbeddingClient;
use embed::cosine_similarity;
use model::node::NodeKind;
use rusqlite::Connection;
use tracing::{instrument, warn};

use crate::types::{SearchResult, clamp_limit};

const RRF_CONSTANT: f64 = 60.0;
const CANDIDATE_CAP: usize = 200;

pub struct HybridSearchOptions<'a> {
    pub project_id: i64,
    pub query: &'a str,
    pub limit: Option<usize>,
    pub kind_filter: Option<NodeKind>,
}

struct Candidate {
    node_id: i64,
    file_path: String,
    qualified_name: String,
    kind: NodeKind,
    signature: String,
    docstring: Option<String>,
    source: String,
    embedding: Option<Vec<f32>>,
    source_alias: Option<String>,
}

/// Runs the hybrid search described in §4.10. The two branches and the
/// fusion step all read within one implicit snapshot (a single `Connection`
/// borrow for the duration of the call; callers wrap this in an explicit
/// transaction when they need a stronger guarantee against concurrent
/// writes, per §5).
#[instrument(skip(conn, client), fields(project_id = opts.project_id))]
pub async fn hybrid_search(
    conn: &Connection,
    client: &dyn EmbeddingClient,
    opts: HybridSearchOptions<'_>,
) -> Result<Vec<SearchResult>> {
    let limit = clamp_limit(opts.limit);
    let candidate_count = (3 * limit).min(CANDIDATE_CAP);

    set_search_probes(conn)?;

    let query_vector = try_embed_query(client, opts.query).await;
    let candidates = load_candidates(conn, opts.project_id, opts.kind_filter)?;

    let vector_ranked = match &query_vector {
        Some(v) => rank_by_vector(&candidates, v, candidate_count),
        None => Vec::new(),
    };
    let keyword_ranked = rank_by_keyword(conn, opts.project_id, opts.kind_filter, opts.query, candidate_count)?;

    let mut scores: HashMap<i64, f64> = HashMap::new();
    for (rank, node_id) in vector_ranked.iter().enumerate() {
        *scores.entry(*node_id).or_insert(0.0) += 1.0 / (RRF_CONSTANT + (rank + 1) as f64);
    }
    for (rank, node_id) in keyword_ranked.iter().enumerate() {
        *scores.entry(*node_id).or_insert(0.0) += 1.0 / (RRF_CONSTANT + (rank + 1) as f64);
    }

    let mut fused: Vec<(i64, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused.truncate(limit);

    let by_id: HashMap<i64, &Candidate> = candidates.iter().map(|c| (c.node_id, c)).collect();
    let results = fused
        .into_iter()
        .filter_map(|(node_id, _score)| by_id.get(&node_id).map(|c| to_search_result(c, query_vector.as_deref())))
        .collect();
    Ok(results)
}

/// The vector-only variant kept for the context assembler's internal uses
/// (§4.10 `SemanticSearch`). Returns `1 - cosine_distance` as similarity.
/// With no embedding provider configured, there is no vector signal to rank
/// by; this returns an empty result set rather than failing (§6) — callers
/// that need results regardless should go through [`hybrid_search`], whose
/// keyword branch keeps working without embeddings.
pub async fn semantic_search(
    conn: &Connection,
    client: &dyn EmbeddingClient,
    project_id: i64,
    query: &str,
    limit: Option<usize>,
    kind_filter: Option<NodeKind>,
) -> Result<Vec<SearchResult>> {
    let limit = clamp_limit(limit);
    let Some(query_vector) = try_embed_query(client, query).await else {
        return Ok(Vec::new());
    };
    let candidates = load_candidates(conn, project_id, kind_filter)?;
    let ranked = rank_by_vector(&candidates, &query_vector, limit);
    let by_id: HashMap<i64, &Candidate> = candidates.iter().map(|c| (c.node_id, c)).collect();
    Ok(ranked.into_iter().filter_map(|id| by_id.get(&id).map(|c| to_search_result(c, Some(&query_vector)))).collect())
}

async fn embed_query(client: &dyn EmbeddingClient, query: &str) -> Result<Vec<f32>> {
    let vectors = client.embed_batch(&[query.to_string()]).await?;
    vectors.into_iter().next().ok_or_else(|| ColonyError::fatal_msg("embedding", "empty response for query"))
}

/// Embeds the query, degrading to `None` instead of propagating the error
/// (§6: an unset API key, or any other embedding failure, must not take
/// down search — lexical search keeps working). Logged rather than silent
/// so a misconfigured key is still visible in the trace.
async fn try_embed_query(client: &dyn EmbeddingClient, query: &str) -> Option<Vec<f32>> {
    match embed_query(client, query).await {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %e, "query embedding unavailable, falling back to keyword-only ranking");
            None
        }
    }
}

/// Sets the vector-index search-probe configuration for this
/// transaction/connection (§4.10). `sqlite-vec`'s `vec0` module performs
/// exact brute-force search rather than an approximate, probe-tunable index
/// (unlike the pgvector-style store the spec's wording is modeled on), so
/// this is an intentional no-op PRAGMA: SQLite silently accepts unknown
/// PRAGMA names, keeping the call site faithful to §4.10 without depending
/// on a setting the extension doesn't have (see DESIGN.md).
fn set_search_probes(conn: &Connection) -> Result<()> {
    conn.execute("PRAGMA vec_search_probes = 10", [])
        .map_err(|e| ColonyError::fatal("search", e))
        .map(|_| ())
}

fn load_candidates(conn: &Connection, project_id: i64, kind_filter: Option<NodeKind>) -> Result<Vec<Candidate>> {
    let mut stmt = conn
        .prepare(
            "SELECT n.id, n.file_path, n.qualified_name, n.kind, n.signature, n.docstring, n.source,
                    n.embedding, s.alias
             FROM nodes n
             JOIN workspaces w ON n.workspace_id = w.id
             JOIN sources s ON w.source_id = s.id
             WHERE w.project_id = ?1 AND (?2 IS NULL OR n.kind = ?2)",
        )
        .map_err(|e| ColonyError::fatal("search", e))?;

    let kind_str = kind_filter.map(|k| k.as_str());
    let rows = stmt
        .query_map(rusqlite::params![project_id, kind_str], |row| {
            let kind_str: String = row.get(3)?;
            let embedding_bytes: Option<Vec<u8>> = row.get(7)?;
            Ok(Candidate {
                node_id: row.get(0)?,
                file_path: row.get(1)?,
                qualified_name: row.get(2)?,
                kind: NodeKind::from_str(&kind_str).unwrap_or(NodeKind::File),
                signature: row.get(4)?,
                docstring: row.get(5)?,
                source: row.get(6)?,
                embedding: embedding_bytes.and_then(|b| graph::vector::decode(&b)),
                source_alias: row.get(8)?,
            })
        })
        .map_err(|e| ColonyError::fatal("search", e))?;

    rows.collect::<std::result::Result<_, _>>().map_err(|e| ColonyError::fatal("search", e))
}

/// Orders candidates by ascending cosine distance to `query_vector`
/// (descending similarity), taking the top `count` (§4.10's vector branch).
/// Candidates with no embedding are excluded, not ranked last with
/// similarity 0 — an un-embedded node cannot meaningfully rank in a vector
/// search.
fn rank_by_vector(candidates: &[Candidate], query_vector: &[f32], count: usize) -> Vec<i64> {
    let mut scored: Vec<(i64, f32)> = candidates
        .iter()
        .filter_map(|c| c.embedding.as_ref().map(|e| (c.node_id, cosine_similarity(e, query_vector))))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(count);
    scored.into_iter().map(|(id, _)| id).collect()
}

/// Keyword branch (§4.10): a parsed full-text query against the weighted
/// lexical column (symbol/qualified name > signature > docstring),
/// descending bm25 relevance.
fn rank_by_keyword(
    conn: &Connection,
    project_id: i64,
    kind_filter: Option<NodeKind>,
    query: &str,
    count: usize,
) -> Result<Vec<i64>> {
    let fts_query = build_fts_query(query);
    if fts_query.is_empty() {
        return Ok(Vec::new());
    }

    let kind_str = kind_filter.map(|k| k.as_str());
    let mut stmt = conn
        .prepare(
            "SELECT n.id
             FROM nodes_fts
             JOIN nodes n ON n.id = nodes_fts.rowid
             JOIN workspaces w ON n.workspace_id = w.id
             WHERE nodes_fts MATCH ?1 AND w.project_id = ?2 AND (?3 IS NULL OR n.kind = ?3)
             ORDER BY bm25(nodes_fts, 10.0, 10.0, 5.0, 1.0) ASC
             LIMIT ?4",
        )
        .map_err(|e| ColonyError::fatal("search", e))?;

    let rows = stmt
        .query_map(rusqlite::params![fts_query, project_id, kind_str, count as i64], |row| row.get(0))
        .map_err(|e| ColonyError::fatal("search", e))?;

    rows.collect::<std::result::Result<_, _>>().map_err(|e| ColonyError::fatal("search", e))
}

/// Tokenizes `query` into an OR'd phrase list, quoting each token so
/// punctuation in source identifiers (`foo.bar`, `Foo<T>`) doesn't trip
/// FTS5's query-syntax parser.
fn build_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|tok| format!("\"{}\"", tok.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn to_search_result(c: &Candidate, query_vector: Option<&[f32]>) -> SearchResult {
    let similarity = query_vector
        .and_then(|q| c.embedding.as_ref().map(|e| cosine_similarity(e, q)))
        .unwrap_or(0.0);
    SearchResult {
        node_id: c.node_id,
        qualified_name: c.qualified_name.clone(),
        file_path: c.file_path.clone(),
        kind: c.kind,
        signature: c.signature.clone(),
        similarity,
        source_code: Some(c.source.clone()),
        docstring: c.docstring.clone(),
        source_alias: c.source_alias.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[test]
    fn fts_query_quotes_tokens() {
        assert_eq!(build_fts_query("foo bar"), "\"foo\" OR \"bar\"");
        assert_eq!(build_fts_query(""), "");
    }

    #[test]
    fn ranks_by_descending_similarity() {
        let candidates = vec![
            Candidate {
                node_id: 1,
                file_path: "a.ts".into(),
                qualified_name: "authenticate".into(),
                kind: NodeKind::Function,
                signature: String::new(),
                docstring: None,
                source: String::new(),
                embedding: Some(vec![1.0, 0.0, 0.0]),
                source_alias: None,
            },
            Candidate {
                node_id: 2,
                file_path: "b.ts".into(),
                qualified_name: "queryUsers".into(),
                kind: NodeKind::Function,
                signature: String::new(),
                docstring: None,
                source: String::new(),
                embedding: Some(vec![0.0, 1.0, 0.0]),
                source_alias: None,
            },
        ];
        let ranked = rank_by_vector(&candidates, &[1.0, 0.0, 0.0], 10);
        assert_eq!(ranked[0], 1);
    }

    struct FailingClient;

    #[async_trait]
    impl EmbeddingClient for FailingClient {
        async fn embed_batch(&self, _inputs: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(ColonyError::ServiceUnavailable("no OPENAI_API_KEY configured".to_string()))
        }
    }

    #[tokio::test]
    async fn falls_back_to_keyword_only_when_embedding_unavailable() {
        let conn = graph::db::open_in_memory().unwrap();
        conn.execute("INSERT INTO projects (id, name) VALUES (1, 'p')", []).unwrap();
        conn.execute("INSERT INTO sources (id, project_id, path, alias) VALUES (1, 1, '/repo', 'main')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO workspaces (id, project_id, source_id, kind) VALUES (1, 1, 1, 'standalone')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO nodes (workspace_id, file_path, name, qualified_name, kind, language, signature,
                start_line, end_line, source, body_hash)
             VALUES (1, 'a.ts', 'authenticate', 'authenticate', 'function', 'typescript', 'function authenticate()',
                1, 3, 'function authenticate() {}', 'hash1')",
            [],
        )
        .unwrap();

        let results = hybrid_search(
            &conn,
            &FailingClient,
            HybridSearchOptions { project_id: 1, query: "authenticate", limit: None, kind_filter: None },
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].qualified_name, "authenticate");
        assert_eq!(results[0].similarity, 0.0); // no vector signal, keyword-only match
    }
}
