//! Batching (§4.6): packs prepared inputs into batches bounded by an item
//! count cap and a token-count cap simultaneously.

use tiktoken_rs::CoreBPE;

use crate::input::count_tokens;

/// Below the embedding API's 300 000-token-per-request cap, leaving headroom
/// (§4.6).
pub const MAX_BATCH_TOKENS: usize = 250_000;

/// One item queued for embedding, carrying whatever identity the caller
/// needs to route the resulting vector back (the qualified name, here).
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub qualified_name: String,
    pub text: String,
}

/// Splits `items` into batches such that no batch exceeds `batch_size` items
/// or `MAX_BATCH_TOKENS` tokens. A single item whose own token count exceeds
/// the cap still gets its own one-item batch (input preparation already
/// bounds it to `TOKEN_LIMIT`, well under `MAX_BATCH_TOKENS`).
pub fn make_batches(items: Vec<BatchItem>, batch_size: usize, bpe: &CoreBPE) -> Vec<Vec<BatchItem>> {
    let mut batches = Vec::new();
    let mut current: Vec<BatchItem> = Vec::new();
    let mut current_tokens = 0usize;

    for item in items {
        let item_tokens = count_tokens(&item.text, bpe);
        let would_exceed_count = current.len() + 1 > batch_size;
        let would_exceed_tokens = current_tokens + item_tokens > MAX_BATCH_TOKENS;

        if !current.is_empty() && (would_exceed_count || would_exceed_tokens) {
            batches.push(std::mem::take(&mut current));
            current_tokens = 0;
        }

        current_tokens += item_tokens;
        current.push(item);
    }

    if !current.is_empty() {
        batches.push(current);
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bpe() -> CoreBPE {
        tiktoken_rs::cl100k_base().expect("bundled cl100k_base ranks")
    }

    fn item(name: &str, text: &str) -> BatchItem {
        BatchItem { qualified_name: name.into(), text: text.into() }
    }

    #[test]
    fn respects_item_count_cap() {
        let items = vec![item("a", "x"), item("b", "y"), item("c", "z")];
        let batches = make_batches(items, 2, &bpe());
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 1);
    }

    #[test]
    fn respects_token_cap() {
        let big = "word ".repeat(60_000);
        let items = vec![item("a", &big), item("b", &big), item("c", "tiny")];
        let batches = make_batches(items, 2048, &bpe());
        assert!(batches.len() >= 2);
        for batch in &batches {
            let bpe = bpe();
            let total: usize = batch.iter().map(|i| count_tokens(&i.text, &bpe)).sum();
            assert!(total <= MAX_BATCH_TOKENS);
        }
    }

    #[test]
    fn empty_input_yields_no_batches() {
        assert!(make_batches(vec![], 10, &bpe()).is_empty());
    }
}
