//! Embedding provider seam.
//!
//! Embedding computation is an external concern; the index only needs a
//! fixed dimensionality and deterministic vectors per input. The bundled
//! [`HashEmbedding`] is a feature-hashing implementation good enough for
//! development and tests without any model or network access.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Failure from an embedding backend.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),

    #[error("embedding request failed: {0}")]
    Request(String),
}

/// Produces fixed-dimension vectors for text.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier, recorded for diagnostics.
    fn model_name(&self) -> &str;

    /// Vector width; every returned embedding has exactly this length.
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Deterministic feature-hashing embedder: each lowercased token is
/// hashed into a bucket with a hash-derived sign, and the result is
/// L2-normalized. Texts sharing vocabulary land near each other, which
/// is all the development path needs.
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimensions: usize,
    model_name: String,
}

impl HashEmbedding {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            model_name: format!("hash-embedding-{dimensions}"),
        }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text.to_lowercase().split_whitespace() {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dimensions;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }
}
