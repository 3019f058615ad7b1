//! Persistent memory: chunked, embedded, hybrid-searchable text keyed by
//! logical path.
//!
//! The index owns its database handle and is the only writer. Chunking
//! and the vector codec are pure; everything stateful lives in
//! [`index::MemoryIndex`].

pub mod chunker;
pub mod embedding;
pub mod index;
pub mod vector;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use embedding::{EmbeddingError, EmbeddingProvider, HashEmbedding};
pub use index::{MemoryIndex, MemoryIndexConfig, SearchOptions};

/// Source category of indexed content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    Memory,
    Sessions,
    Extra,
}

impl MemorySource {
    pub fn as_str(self) -> &'static str {
        match self {
            MemorySource::Memory => "memory",
            MemorySource::Sessions => "sessions",
            MemorySource::Extra => "extra",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "memory" => Some(MemorySource::Memory),
            "sessions" => Some(MemorySource::Sessions),
            "extra" => Some(MemorySource::Extra),
            _ => None,
        }
    }
}

/// A slice of a source text, the unit of embedding and retrieval.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: Option<i64>,
    pub path: String,
    pub source: MemorySource,
    /// 1-based, inclusive.
    pub start_line: u32,
    /// 1-based, inclusive; always >= `start_line`.
    pub end_line: u32,
    pub hash: String,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
}

/// A file tracked by the index.
#[derive(Debug, Clone)]
pub struct IndexedFile {
    pub path: String,
    pub hash: String,
    pub mtime: f64,
    pub size: u64,
    pub source: MemorySource,
    pub indexed_at: DateTime<Utc>,
}

/// One hybrid-search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub path: String,
    pub source: MemorySource,
    pub start_line: u32,
    pub end_line: u32,
    pub score: f64,
    pub snippet: String,
}

/// Aggregate statistics over the index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub file_count: u64,
    pub chunk_count: u64,
    pub sources: HashMap<String, u64>,
    pub last_sync: Option<DateTime<Utc>>,
    pub index_size_bytes: u64,
}

/// Memory subsystem errors.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
