//! C6 Embedder (§4.6): token-budgeted input preparation, batching against a
//! rate-limited embeddings API with retry, and a body-hash reuse policy.

pub mod batch;
pub mod client;
pub mod input;
pub mod reuse;
pub mod similarity;

use std::collections::HashMap;

use common::error::{ColonyError, Result};
use tiktoken_rs::CoreBPE;
use tokio_util::sync::CancellationToken;

pub use batch::{BatchItem, make_batches};
pub use client::{EmbeddingClient, OpenAiEmbeddingClient};
pub use input::{EmbeddingInput, prepare_input};
pub use reuse::Candidate;
pub use similarity::cosine_similarity;

/// One node's embedding outcome: either carried over from the prior run or
/// freshly computed.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedOutcome {
    pub qualified_name: String,
    pub embedding: Vec<f32>,
    pub reused: bool,
}

/// Embeds every node in `candidates` that isn't eligible for reuse (§4.6),
/// batching remote calls and invoking `on_batch_complete` after each one.
/// `stored_hashes`/`stored_vectors` key on qualified name, scoped by the
/// caller to a single workspace.
pub async fn embed_candidates(
    candidates: Vec<Candidate>,
    stored_hashes: &HashMap<String, String>,
    stored_vectors: &HashMap<String, Vec<f32>>,
    client: &dyn EmbeddingClient,
    batch_size: usize,
    cancel: &CancellationToken,
    mut on_batch_complete: impl FnMut(usize, usize),
) -> Result<Vec<EmbedOutcome>> {
    let (reused, to_embed) = reuse::partition_reuse(candidates, stored_hashes, stored_vectors);

    let mut outcomes: Vec<EmbedOutcome> = reused
        .into_iter()
        .map(|(qualified_name, embedding)| EmbedOutcome { qualified_name, embedding, reused: true })
        .collect();

    if to_embed.is_empty() {
        return Ok(outcomes);
    }

    let bpe = cl100k().map_err(|e| ColonyError::fatal_msg("embedding", e))?;
    let items: Vec<BatchItem> = to_embed
        .iter()
        .map(|c| {
            let prepared = prepare_input(
                &EmbeddingInput {
                    qualified_name: c.qualified_name.clone(),
                    signature: c.signature.clone(),
                    docstring: c.docstring.clone(),
                    source: c.source.clone(),
                },
                &bpe,
            );
            BatchItem { qualified_name: c.qualified_name.clone(), text: prepared }
        })
        .collect();

    let batches = make_batches(items, batch_size, &bpe);
    let total_batches = batches.len();

    for (batch_idx, batch) in batches.into_iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(ColonyError::fatal_msg("embedding", "cancelled"));
        }
        let texts: Vec<String> = batch.iter().map(|i| i.text.clone()).collect();
        let vectors = client.embed_batch(&texts).await?;
        if vectors.len() != batch.len() {
            return Err(ColonyError::fatal_msg(
                "embedding",
                format!("embedding API returned {} vectors for {} inputs", vectors.len(), batch.len()),
            ));
        }
        for (item, vector) in batch.into_iter().zip(vectors.into_iter()) {
            outcomes.push(EmbedOutcome { qualified_name: item.qualified_name, embedding: vector, reused: false });
        }
        on_batch_complete(batch_idx + 1, total_batches);
    }

    Ok(outcomes)
}

fn cl100k() -> std::result::Result<CoreBPE, anyhow_like::AnyhowLike> {
    tiktoken_rs::cl100k_base().map_err(|e| anyhow_like::AnyhowLike(e.to_string()))
}

/// `tiktoken_rs::cl100k_base` returns `anyhow::Result`; this crate doesn't
/// otherwise depend on `anyhow`, so a one-off `Display` shim avoids pulling
/// it in for a single call site.
mod anyhow_like {
    #[derive(Debug)]
    pub struct AnyhowLike(pub String);

    impl std::fmt::Display for AnyhowLike {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubClient;

    #[async_trait]
    impl EmbeddingClient for StubClient {
        async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(inputs.iter().map(|_| vec![0.5; 3]).collect())
        }
    }

    fn candidate(name: &str) -> Candidate {
        Candidate {
            qualified_name: name.into(),
            body_hash: format!("hash-{name}"),
            signature: format!("fn {name}()"),
            docstring: None,
            source: format!("fn {name}() {{}}"),
        }
    }

    #[tokio::test]
    async fn reuses_unchanged_and_embeds_the_rest() {
        let mut hashes = HashMap::new();
        hashes.insert("foo".to_string(), "hash-foo".to_string());
        let mut vectors = HashMap::new();
        vectors.insert("foo".to_string(), vec![1.0, 1.0, 1.0]);

        let candidates = vec![candidate("foo"), candidate("bar")];
        let client = StubClient;
        let cancel = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        let outcomes = embed_candidates(candidates, &hashes, &vectors, &client, 2048, &cancel, |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

        assert_eq!(outcomes.len(), 2);
        let foo = outcomes.iter().find(|o| o.qualified_name == "foo").unwrap();
        assert!(foo.reused);
        assert_eq!(foo.embedding, vec![1.0, 1.0, 1.0]);
        let bar = outcomes.iter().find(|o| o.qualified_name == "bar").unwrap();
        assert!(!bar.reused);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn all_reused_skips_remote_call() {
        let mut hashes = HashMap::new();
        hashes.insert("foo".to_string(), "hash-foo".to_string());
        let mut vectors = HashMap::new();
        vectors.insert("foo".to_string(), vec![1.0, 1.0, 1.0]);

        struct PanicClient;
        #[async_trait]
        impl EmbeddingClient for PanicClient {
            async fn embed_batch(&self, _inputs: &[String]) -> Result<Vec<Vec<f32>>> {
                panic!("should not be called");
            }
        }

        let outcomes = embed_candidates(
            vec![candidate("foo")],
            &hashes,
            &vectors,
            &PanicClient,
            2048,
            &CancellationToken::new(),
            |_, _| {},
        )
        .await
        .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].reused);
    }
}
