//! Embedding vector codec and similarity.
//!
//! Vectors persist as fixed-width little-endian f32 blobs of exactly
//! `4 * dimensions` bytes. Deserialization rejects any other width, which
//! is how stale vectors from a previous embedding model are fenced off.

/// Serialize a vector to its blob form.
pub fn serialize(embedding: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Deserialize a blob, returning `None` when its length is not
/// `4 * dimensions`.
pub fn deserialize(blob: &[u8], dimensions: usize) -> Option<Vec<f32>> {
    if blob.len() != dimensions * 4 {
        return None;
    }
    let mut out = Vec::with_capacity(dimensions);
    for bytes in blob.chunks_exact(4) {
        out.push(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
    }
    Some(out)
}

/// Cosine similarity in [-1, 1]; 0 for mismatched or zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
