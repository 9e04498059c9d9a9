//! Reuse policy (§4.6): a node whose new body hash matches the stored one,
//! and whose stored vector is non-null, is carried over without
//! re-embedding.

use std::collections::HashMap;

/// One node queued for possible embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub qualified_name: String,
    pub body_hash: String,
    pub signature: String,
    pub docstring: Option<String>,
    pub source: String,
}

/// Partitions `candidates` into those whose stored vector can be reused
/// as-is and those that need a fresh embedding call.
pub fn partition_reuse(
    candidates: Vec<Candidate>,
    stored_hashes: &HashMap<String, String>,
    stored_vectors: &HashMap<String, Vec<f32>>,
) -> (Vec<(String, Vec<f32>)>, Vec<Candidate>) {
    let mut reused = Vec::new();
    let mut to_embed = Vec::new();

    for candidate in candidates {
        let unchanged = stored_hashes.get(&candidate.qualified_name) == Some(&candidate.body_hash);
        if unchanged {
            if let Some(vector) = stored_vectors.get(&candidate.qualified_name) {
                reused.push((candidate.qualified_name, vector.clone()));
                continue;
            }
        }
        to_embed.push(candidate);
    }

    (reused, to_embed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, hash: &str) -> Candidate {
        Candidate {
            qualified_name: name.into(),
            body_hash: hash.into(),
            signature: String::new(),
            docstring: None,
            source: String::new(),
        }
    }

    #[test]
    fn reuses_unchanged_hash_with_stored_vector() {
        let mut hashes = HashMap::new();
        hashes.insert("foo".to_string(), "h1".to_string());
        let mut vectors = HashMap::new();
        vectors.insert("foo".to_string(), vec![1.0, 2.0]);

        let (reused, to_embed) = partition_reuse(vec![candidate("foo", "h1")], &hashes, &vectors);
        assert_eq!(reused, vec![("foo".to_string(), vec![1.0, 2.0])]);
        assert!(to_embed.is_empty());
    }

    #[test]
    fn reembeds_on_hash_change() {
        let mut hashes = HashMap::new();
        hashes.insert("foo".to_string(), "h1".to_string());
        let mut vectors = HashMap::new();
        vectors.insert("foo".to_string(), vec![1.0, 2.0]);

        let (reused, to_embed) = partition_reuse(vec![candidate("foo", "h2")], &hashes, &vectors);
        assert!(reused.is_empty());
        assert_eq!(to_embed.len(), 1);
    }

    #[test]
    fn reembeds_when_no_stored_vector() {
        let mut hashes = HashMap::new();
        hashes.insert("foo".to_string(), "h1".to_string());
        let vectors = HashMap::new();

        let (reused, to_embed) = partition_reuse(vec![candidate("foo", "h1")], &hashes, &vectors);
        assert!(reused.is_empty());
        assert_eq!(to_embed.len(), 1);
    }

    #[test]
    fn reembeds_unknown_node() {
        let hashes = HashMap::new();
        let vectors = HashMap::new();
        let (reused, to_embed) = partition_reuse(vec![candidate("foo", "h1")], &hashes, &vectors);
        assert!(reused.is_empty());
        assert_eq!(to_embed.len(), 1);
    }
}
