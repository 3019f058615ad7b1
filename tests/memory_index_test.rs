//! Integration tests for the hybrid memory index against a real
//! temporary SQLite database.

use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use switchboard::database::{DatabaseConnection, DatabasePath};
use switchboard::memory::index::SearchOptions;
use switchboard::memory::{
    EmbeddingError, EmbeddingProvider, HashEmbedding, MemoryIndex, MemoryIndexConfig, MemorySource,
};

async fn index_with(
    dir: &TempDir,
    embedder: Arc<dyn EmbeddingProvider>,
    config: MemoryIndexConfig,
) -> MemoryIndex {
    let path = DatabasePath::parse(dir.path().join("memory.db")).expect("valid db path");
    let connection = DatabaseConnection::initialize(path)
        .await
        .expect("database initializes");
    MemoryIndex::new(connection, embedder, config)
}

async fn default_index(dir: &TempDir) -> MemoryIndex {
    index_with(dir, Arc::new(HashEmbedding::new(64)), MemoryIndexConfig::default()).await
}

#[test_log::test(tokio::test)]
async fn index_file_creates_chunks_and_skips_unchanged() {
    let dir = TempDir::new().unwrap();
    let index = default_index(&dir).await;

    let file = dir.path().join("notes.md");
    tokio::fs::write(&file, "alpha beta\ngamma delta\n").await.unwrap();

    let first = index
        .index_file(&file.to_string_lossy(), MemorySource::Memory)
        .await
        .unwrap();
    assert!(first > 0);

    // Unchanged content short-circuits without writes.
    let second = index
        .index_file(&file.to_string_lossy(), MemorySource::Memory)
        .await
        .unwrap();
    assert_eq!(second, 0);

    // Changed content replaces the chunks.
    tokio::fs::write(&file, "entirely new words\n").await.unwrap();
    let third = index
        .index_file(&file.to_string_lossy(), MemorySource::Memory)
        .await
        .unwrap();
    assert!(third > 0);

    let stats = index.stats().await.unwrap();
    assert_eq!(stats.file_count, 1);
    assert_eq!(stats.chunk_count, third as u64);

    let files = index.list_files().await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].source, MemorySource::Memory);
    assert!(files[0].size > 0);
}

#[tokio::test]
async fn missing_file_indexes_as_zero_chunks() {
    let dir = TempDir::new().unwrap();
    let index = default_index(&dir).await;
    let count = index
        .index_file("/definitely/not/present.md", MemorySource::Memory)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn get_prefers_file_then_reconstructs_from_chunks() {
    let dir = TempDir::new().unwrap();
    let index = default_index(&dir).await;

    let file = dir.path().join("doc.md");
    let content = "first line\nsecond line\nthird line";
    tokio::fs::write(&file, content).await.unwrap();
    let path = file.to_string_lossy().to_string();
    index.index_file(&path, MemorySource::Memory).await.unwrap();

    // Original file still present.
    assert_eq!(index.get(&path).await.unwrap().as_deref(), Some(content));

    // Remove the file: reconstruction from stored chunks.
    tokio::fs::remove_file(&file).await.unwrap();
    assert_eq!(index.get(&path).await.unwrap().as_deref(), Some(content));

    // Unknown path yields nothing.
    assert_eq!(index.get("never-indexed").await.unwrap(), None);
}

#[tokio::test]
async fn index_text_round_trips_through_search() {
    let dir = TempDir::new().unwrap();
    let index = default_index(&dir).await;

    index
        .index_text(
            "the quick brown fox jumps over the lazy dog",
            "mem://animals",
            MemorySource::Sessions,
        )
        .await
        .unwrap();

    let results = index
        .search(
            "fox",
            &SearchOptions {
                min_score: 0.0,
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].path, "mem://animals");
    assert_eq!(results[0].source, MemorySource::Sessions);
    assert!(results[0].snippet.contains("fox"));
    assert!(results[0].start_line >= 1);
}

/// Deterministic two-dimensional embedder for ranking tests: the query
/// and each stored chunk get fixed vectors with known cosines.
struct FixedEmbedding;

#[async_trait]
impl EmbeddingProvider for FixedEmbedding {
    fn model_name(&self) -> &str {
        "fixed"
    }

    fn dimensions(&self) -> usize {
        2
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        // Query axis is [1, 0]; chunk vectors are unit vectors whose dot
        // product with the query is the intended similarity.
        let similarity: f32 = if text.contains("fox") {
            if text == "fox" { 1.0 } else { 0.9 }
        } else {
            0.1
        };
        Ok(vec![similarity, (1.0 - similarity * similarity).sqrt()])
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

#[test_log::test(tokio::test)]
async fn hybrid_search_ranks_by_weighted_combination() {
    let dir = TempDir::new().unwrap();
    let index = index_with(&dir, Arc::new(FixedEmbedding), MemoryIndexConfig::default()).await;

    index
        .index_text("the red fox jumps", "mem://a", MemorySource::Memory)
        .await
        .unwrap();
    index
        .index_text("blue sky", "mem://b", MemorySource::Memory)
        .await
        .unwrap();

    // Vector similarity favors A heavily (0.9 vs 0.1 against the query
    // axis); the text side only matches A at all.
    let results = index
        .search(
            "fox",
            &SearchOptions {
                min_score: 0.05,
                vector_weight: 0.7,
                text_weight: 0.3,
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].path, "mem://a");
    assert_eq!(results[1].path, "mem://b");
    assert!(results[0].score > results[1].score);

    // A's combined score includes both components.
    assert!(results[0].score > 0.6);

    // A high cutoff drops the weak candidate.
    let filtered = index
        .search(
            "fox",
            &SearchOptions {
                min_score: 0.5,
                vector_weight: 0.7,
                text_weight: 0.3,
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].path, "mem://a");
}

#[tokio::test]
async fn source_filter_restricts_results() {
    let dir = TempDir::new().unwrap();
    let index = default_index(&dir).await;

    index
        .index_text("shared topic words", "mem://m", MemorySource::Memory)
        .await
        .unwrap();
    index
        .index_text("shared topic words", "mem://s", MemorySource::Sessions)
        .await
        .unwrap();

    let results = index
        .search(
            "topic",
            &SearchOptions {
                min_score: 0.0,
                sources: Some(vec![MemorySource::Sessions]),
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.source == MemorySource::Sessions));
}

#[tokio::test]
async fn sync_indexes_directories_recursively() {
    let dir = TempDir::new().unwrap();
    let index = default_index(&dir).await;

    let content_dir = dir.path().join("notes");
    let nested = content_dir.join("inner");
    tokio::fs::create_dir_all(&nested).await.unwrap();
    tokio::fs::write(content_dir.join("a.md"), "first note").await.unwrap();
    tokio::fs::write(nested.join("b.txt"), "second note").await.unwrap();
    tokio::fs::write(nested.join("ignored.rs"), "fn main() {}").await.unwrap();

    let synced = index.sync(&[content_dir], MemorySource::Extra).await.unwrap();
    assert_eq!(synced, 2);

    let stats = index.stats().await.unwrap();
    assert_eq!(stats.file_count, 2);
    assert_eq!(stats.sources.get("extra"), Some(&2));
    assert!(stats.last_sync.is_some());
    assert!(stats.index_size_bytes > 0);
}

#[tokio::test]
async fn rebuild_drops_stale_records() {
    let dir = TempDir::new().unwrap();
    let index = default_index(&dir).await;

    index
        .index_text("transient content", "mem://stale", MemorySource::Memory)
        .await
        .unwrap();
    assert_eq!(index.stats().await.unwrap().file_count, 1);

    let rebuilt = index.rebuild(&[], MemorySource::Memory).await.unwrap();
    assert_eq!(rebuilt, 0);
    let stats = index.stats().await.unwrap();
    assert_eq!(stats.file_count, 0);
    assert_eq!(stats.chunk_count, 0);
}
