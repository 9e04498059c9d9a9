//! Binary encoding for embedding vectors, shared by the `nodes.embedding`
//! BLOB column and the `nodes_vec` virtual table (`sqlite-vec` expects raw
//! little-endian `f32` bytes, the same layout `zerocopy` gives us for free).

use zerocopy::IntoBytes;

use model::EMBEDDING_DIMS;

/// Encodes a vector as the raw little-endian `f32` bytes `sqlite-vec` reads.
pub fn encode(vector: &[f32]) -> Vec<u8> {
    vector.as_bytes().to_vec()
}

/// Decodes the raw bytes back into a vector. Returns `None` if the byte
/// length isn't a multiple of 4 (corrupt row).
pub fn decode(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect())
}

pub fn is_valid_dim(vector: &[f32]) -> bool {
    vector.len() == EMBEDDING_DIMS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let v = vec![1.0_f32, -2.5, 0.0, 3.25];
        let bytes = encode(&v);
        assert_eq!(decode(&bytes).unwrap(), v);
    }
}
