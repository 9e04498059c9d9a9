//! Input preparation (§4.6): concatenates a node's signature, docstring, and
//! source into a single embeddable string, enforcing the embedding model's
//! 8191-token context limit.

use tiktoken_rs::CoreBPE;

/// The embedding model's own tokenizer context limit (§4.6). `text-embedding-
/// 3-small` shares `cl100k_base` with the GPT-3.5/4 chat family.
pub const TOKEN_LIMIT: usize = 8_191;

/// One node's raw material for embedding, before batching.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingInput {
    pub qualified_name: String,
    pub signature: String,
    pub docstring: Option<String>,
    pub source: String,
}

/// Concatenates `signature \n docstring \n source` (non-empty parts only)
/// and truncates to fit `TOKEN_LIMIT` tokens (§4.6 truncation rule):
/// signature + docstring are kept verbatim and `source` is truncated from
/// the right by token count; if signature + docstring alone exceed the
/// limit, the whole concatenation is hard-truncated.
pub fn prepare_input(input: &EmbeddingInput, bpe: &CoreBPE) -> String {
    let header = join_nonempty(&[input.signature.as_str(), input.docstring.as_deref().unwrap_or("")]);
    let header_tokens = bpe.encode_with_special_tokens(&header);

    if header_tokens.len() >= TOKEN_LIMIT {
        let full = join_nonempty(&[header.as_str(), input.source.as_str()]);
        let tokens = bpe.encode_with_special_tokens(&full);
        return decode_prefix(bpe, &tokens, TOKEN_LIMIT);
    }

    let budget_for_source = TOKEN_LIMIT - header_tokens.len();
    let source_tokens = bpe.encode_with_special_tokens(&input.source);
    if source_tokens.len() <= budget_for_source {
        return join_nonempty(&[header.as_str(), input.source.as_str()]);
    }

    let truncated_source = decode_prefix(bpe, &source_tokens, budget_for_source);
    join_nonempty(&[header.as_str(), truncated_source.as_str()])
}

fn join_nonempty(parts: &[&str]) -> String {
    parts.iter().filter(|p| !p.is_empty()).cloned().collect::<Vec<_>>().join("\n")
}

fn decode_prefix(bpe: &CoreBPE, tokens: &[u32], limit: usize) -> String {
    let slice = &tokens[..tokens.len().min(limit)];
    bpe.decode(slice.to_vec()).unwrap_or_default()
}

/// Number of tokens `text` would occupy, per the embedding model's tokenizer.
pub fn count_tokens(text: &str, bpe: &CoreBPE) -> usize {
    bpe.encode_with_special_tokens(text).len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bpe() -> CoreBPE {
        tiktoken_rs::cl100k_base().expect("bundled cl100k_base ranks")
    }

    #[test]
    fn joins_nonempty_parts() {
        let input = EmbeddingInput {
            qualified_name: "foo".into(),
            signature: "fn foo()".into(),
            docstring: Some("does foo".into()),
            source: "fn foo() {}".into(),
        };
        let out = prepare_input(&input, &bpe());
        assert_eq!(out, "fn foo()\ndoes foo\nfn foo() {}");
    }

    #[test]
    fn skips_empty_docstring() {
        let input = EmbeddingInput {
            qualified_name: "foo".into(),
            signature: "fn foo()".into(),
            docstring: None,
            source: "fn foo() {}".into(),
        };
        let out = prepare_input(&input, &bpe());
        assert_eq!(out, "fn foo()\nfn foo() {}");
    }

    #[test]
    fn truncates_source_when_over_limit() {
        let long_source = "x = 1\n".repeat(5_000);
        let input = EmbeddingInput {
            qualified_name: "foo".into(),
            signature: "fn foo()".into(),
            docstring: None,
            source: long_source,
        };
        let bpe = bpe();
        let out = prepare_input(&input, &bpe);
        assert!(count_tokens(&out, &bpe) <= TOKEN_LIMIT);
        assert!(out.starts_with("fn foo()"));
    }
}
