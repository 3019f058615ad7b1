//! Hybrid memory index over the embedded database.
//!
//! Combines exact cosine similarity over stored embeddings with FTS5
//! full-text ranking. Per-path replacement is transactional: a file's
//! chunks are deleted and re-created atomically when its content hash
//! changes, and an unchanged hash short-circuits without writes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::{debug, info, instrument, warn};

use crate::database::DatabaseConnection;

use super::chunker::{chunk_text, content_hash};
use super::embedding::EmbeddingProvider;
use super::vector::{cosine_similarity, deserialize, serialize};
use super::{IndexStats, MemoryError, MemorySource, SearchResult};

const SELECT_FILE_HASH: &str = "SELECT hash FROM files WHERE path = ?";

const DELETE_CHUNKS_FOR_PATH: &str = "DELETE FROM chunks WHERE path = ?";

const INSERT_CHUNK: &str = r"
INSERT INTO chunks (path, source, start_line, end_line, hash, text, embedding, updated_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?);
";

const UPSERT_FILE: &str = r"
INSERT OR REPLACE INTO files (path, hash, mtime, size, source, indexed_at)
VALUES (?, ?, ?, ?, ?, ?);
";

const SELECT_CHUNK_BY_ID: &str =
    "SELECT path, source, start_line, end_line, text FROM chunks WHERE id = ?";

const SELECT_CHUNK_TEXTS: &str =
    "SELECT text FROM chunks WHERE path = ? ORDER BY start_line";

/// File extensions picked up when syncing a directory.
const RECOGNIZED_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

/// Snippet window width in characters.
const SNIPPET_MAX_LENGTH: usize = 500;

/// Chunking configuration.
#[derive(Debug, Clone)]
pub struct MemoryIndexConfig {
    pub chunk_size_tokens: usize,
    pub chunk_overlap_tokens: usize,
}

impl Default for MemoryIndexConfig {
    fn default() -> Self {
        Self {
            chunk_size_tokens: 500,
            chunk_overlap_tokens: 50,
        }
    }
}

/// Search tuning for one query.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub max_results: usize,
    pub min_score: f64,
    pub sources: Option<Vec<MemorySource>>,
    pub vector_weight: f64,
    pub text_weight: f64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_results: 10,
            min_score: 0.3,
            sources: None,
            vector_weight: 0.7,
            text_weight: 0.3,
        }
    }
}

/// The memory index. Exclusive owner of its database handle.
pub struct MemoryIndex {
    connection: DatabaseConnection,
    embedder: Arc<dyn EmbeddingProvider>,
    config: MemoryIndexConfig,
}

impl MemoryIndex {
    pub fn new(
        connection: DatabaseConnection,
        embedder: Arc<dyn EmbeddingProvider>,
        config: MemoryIndexConfig,
    ) -> Self {
        Self {
            connection,
            embedder,
            config,
        }
    }

    /// Index a file from disk. Returns the number of chunks created; 0
    /// when the file is unreadable or its hash is unchanged.
    #[instrument(skip(self), fields(path = %path))]
    pub async fn index_file(
        &self,
        path: &str,
        source: MemorySource,
    ) -> Result<usize, MemoryError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(error) => {
                warn!(%path, %error, "file unreadable, skipping index");
                return Ok(0);
            }
        };

        let (mtime, size) = match tokio::fs::metadata(path).await {
            Ok(meta) => {
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0);
                (mtime, meta.len())
            }
            Err(_) => (0.0, content.len() as u64),
        };

        self.index_content(&content, path, source, mtime, size).await
    }

    /// Index in-memory text under a logical path with a synthetic size.
    #[instrument(skip(self, text), fields(path = %path))]
    pub async fn index_text(
        &self,
        text: &str,
        path: &str,
        source: MemorySource,
    ) -> Result<usize, MemoryError> {
        self.index_content(text, path, source, 0.0, text.len() as u64)
            .await
    }

    async fn index_content(
        &self,
        content: &str,
        path: &str,
        source: MemorySource,
        mtime: f64,
        size: u64,
    ) -> Result<usize, MemoryError> {
        let hash = content_hash(content);

        let existing: Option<(String,)> = sqlx::query_as(SELECT_FILE_HASH)
            .bind(path)
            .fetch_optional(self.connection.pool())
            .await?;
        if existing.as_ref().is_some_and(|(h,)| h == &hash) {
            debug!(%path, "content unchanged, skipping reindex");
            return Ok(0);
        }

        let mut chunks = chunk_text(
            content,
            path,
            source,
            self.config.chunk_size_tokens,
            self.config.chunk_overlap_tokens,
        );
        if chunks.is_empty() {
            return Ok(0);
        }

        // Embed before opening the transaction so a slow or failing
        // provider never holds database locks.
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = match self.embedder.embed_batch(&texts).await {
            Ok(embeddings) => embeddings,
            Err(error) => {
                warn!(%path, %error, "embedding failed, file not indexed");
                return Ok(0);
            }
        };
        for (chunk, embedding) in chunks.iter_mut().zip(embeddings.into_iter()) {
            chunk.embedding = Some(embedding);
        }

        let now = Utc::now().to_rfc3339();
        let mut tx = self.connection.pool().begin().await?;

        sqlx::query(DELETE_CHUNKS_FOR_PATH)
            .bind(path)
            .execute(&mut *tx)
            .await?;

        for chunk in &chunks {
            let blob = chunk.embedding.as_deref().map(serialize);
            sqlx::query(INSERT_CHUNK)
                .bind(&chunk.path)
                .bind(chunk.source.as_str())
                .bind(i64::from(chunk.start_line))
                .bind(i64::from(chunk.end_line))
                .bind(&chunk.hash)
                .bind(&chunk.text)
                .bind(blob)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(UPSERT_FILE)
            .bind(path)
            .bind(&hash)
            .bind(mtime)
            .bind(size as i64)
            .bind(source.as_str())
            .bind(&now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(%path, chunks = chunks.len(), "file indexed");
        Ok(chunks.len())
    }

    /// Hybrid search: weighted combination of cosine similarity and
    /// normalized BM25, cut at `min_score`, top `max_results`.
    #[instrument(skip(self), fields(query = %query))]
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, MemoryError> {
        let candidate_limit = options.max_results * 2;
        let mut scores: HashMap<i64, (f64, f64)> = HashMap::new();

        match self.embedder.embed(query).await {
            Ok(query_embedding) => {
                for (id, score) in self
                    .vector_search(&query_embedding, candidate_limit, options.sources.as_deref())
                    .await?
                {
                    scores.entry(id).or_insert((0.0, 0.0)).0 = score;
                }
            }
            Err(error) => warn!(%error, "vector search unavailable for this query"),
        }

        for (id, score) in self
            .text_search(query, candidate_limit, options.sources.as_deref())
            .await
        {
            scores.entry(id).or_insert((0.0, 0.0)).1 = score;
        }

        let mut combined: Vec<(i64, f64)> = scores
            .into_iter()
            .map(|(id, (vec_score, text_score))| {
                (
                    id,
                    vec_score * options.vector_weight + text_score * options.text_weight,
                )
            })
            .filter(|(_, score)| *score >= options.min_score)
            .collect();
        combined.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        combined.truncate(options.max_results);

        let mut results = Vec::with_capacity(combined.len());
        for (id, score) in combined {
            let row = sqlx::query(SELECT_CHUNK_BY_ID)
                .bind(id)
                .fetch_optional(self.connection.pool())
                .await?;
            let Some(row) = row else { continue };

            let source_str: String = row.get("source");
            let Some(source) = MemorySource::parse(&source_str) else {
                continue;
            };
            let text: String = row.get("text");

            results.push(SearchResult {
                path: row.get("path"),
                source,
                start_line: row.get::<i64, _>("start_line") as u32,
                end_line: row.get::<i64, _>("end_line") as u32,
                score,
                snippet: generate_snippet(&text, query, SNIPPET_MAX_LENGTH),
            });
        }

        Ok(results)
    }

    /// Exact cosine similarity over stored embeddings whose width matches
    /// the current provider. Scores clamp to [0, 1].
    async fn vector_search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        sources: Option<&[MemorySource]>,
    ) -> Result<Vec<(i64, f64)>, MemoryError> {
        let dims = query_embedding.len();
        if dims == 0 {
            return Ok(Vec::new());
        }

        let mut builder = sqlx::QueryBuilder::new(
            "SELECT id, embedding FROM chunks WHERE embedding IS NOT NULL AND LENGTH(embedding) = ",
        );
        builder.push_bind((dims * 4) as i64);
        push_source_filter(&mut builder, "source", sources);

        let rows = builder.build().fetch_all(self.connection.pool()).await?;

        let mut scored: Vec<(i64, f64)> = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get("id");
            let blob: Vec<u8> = row.get("embedding");
            let Some(stored) = deserialize(&blob, dims) else {
                continue;
            };
            let score = cosine_similarity(query_embedding, &stored).clamp(0.0, 1.0);
            scored.push((id, score));
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    /// FTS5 search with OR-joined sanitized terms; BM25 normalized into
    /// [0, 1]. Query errors degrade to no text hits.
    async fn text_search(
        &self,
        query: &str,
        limit: usize,
        sources: Option<&[MemorySource]>,
    ) -> Vec<(i64, f64)> {
        let fts_query = query
            .split_whitespace()
            .map(|term| {
                term.chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect::<String>()
            })
            .filter(|term| !term.is_empty())
            .collect::<Vec<_>>()
            .join(" OR ");
        if fts_query.is_empty() {
            return Vec::new();
        }

        let mut builder = sqlx::QueryBuilder::new(
            "SELECT c.id AS id, bm25(chunks_fts) AS score \
             FROM chunks_fts f JOIN chunks c ON c.id = f.rowid \
             WHERE chunks_fts MATCH ",
        );
        builder.push_bind(&fts_query);
        push_source_filter(&mut builder, "c.source", sources);
        builder.push(" ORDER BY score LIMIT ");
        builder.push_bind(limit as i64);

        match builder.build().fetch_all(self.connection.pool()).await {
            Ok(rows) => rows
                .into_iter()
                .map(|row| {
                    let id: i64 = row.get("id");
                    let raw: f64 = row.get("score");
                    // bm25 ranks best-first with negative values.
                    (id, (raw.abs() / 10.0).min(1.0))
                })
                .collect(),
            Err(error) => {
                warn!(%error, "full-text search failed");
                Vec::new()
            }
        }
    }

    /// Full content for a path: the original file when it still exists,
    /// otherwise a reconstruction from stored chunks.
    pub async fn get(&self, path: &str) -> Result<Option<String>, MemoryError> {
        if let Ok(content) = tokio::fs::read_to_string(path).await {
            return Ok(Some(content));
        }

        let rows = sqlx::query(SELECT_CHUNK_TEXTS)
            .bind(path)
            .fetch_all(self.connection.pool())
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let texts: Vec<String> = rows.into_iter().map(|row| row.get("text")).collect();
        Ok(Some(texts.join("\n")))
    }

    /// Index every given file, and every recognized file under every
    /// given directory. Returns the number of files that produced chunks.
    #[instrument(skip(self, paths))]
    pub async fn sync(
        &self,
        paths: &[PathBuf],
        source: MemorySource,
    ) -> Result<usize, MemoryError> {
        let mut synced = 0usize;

        for path in paths {
            if path.is_file() {
                if self.index_file(&path.to_string_lossy(), source).await? > 0 {
                    synced += 1;
                }
            } else if path.is_dir() {
                for file in collect_recognized_files(path) {
                    if self.index_file(&file.to_string_lossy(), source).await? > 0 {
                        synced += 1;
                    }
                }
            }
        }

        info!(files = synced, "memory sync complete");
        Ok(synced)
    }

    /// Drop every chunk and file record, then re-sync the given paths
    /// with the current embedding provider. The recovery path for an
    /// embedding dimensionality change.
    pub async fn rebuild(
        &self,
        paths: &[PathBuf],
        source: MemorySource,
    ) -> Result<usize, MemoryError> {
        let mut tx = self.connection.pool().begin().await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM files").execute(&mut *tx).await?;
        tx.commit().await?;

        self.sync(paths, source).await
    }

    /// Every tracked file record.
    pub async fn list_files(&self) -> Result<Vec<super::IndexedFile>, MemoryError> {
        let rows = sqlx::query(
            "SELECT path, hash, mtime, size, source, indexed_at FROM files ORDER BY path",
        )
        .fetch_all(self.connection.pool())
        .await?;

        let mut files = Vec::with_capacity(rows.len());
        for row in rows {
            let source_str: String = row.get("source");
            let Some(source) = MemorySource::parse(&source_str) else {
                continue;
            };
            let indexed_at: String = row.get("indexed_at");
            files.push(super::IndexedFile {
                path: row.get("path"),
                hash: row.get("hash"),
                mtime: row.get("mtime"),
                size: row.get::<i64, _>("size") as u64,
                source,
                indexed_at: DateTime::parse_from_rfc3339(&indexed_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            });
        }
        Ok(files)
    }

    /// Aggregate index statistics.
    pub async fn stats(&self) -> Result<IndexStats, MemoryError> {
        let pool = self.connection.pool();

        let per_source = sqlx::query("SELECT source, COUNT(*) AS count FROM files GROUP BY source")
            .fetch_all(pool)
            .await?;
        let sources: HashMap<String, u64> = per_source
            .into_iter()
            .map(|row| {
                (
                    row.get::<String, _>("source"),
                    row.get::<i64, _>("count") as u64,
                )
            })
            .collect();

        let (file_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM files")
            .fetch_one(pool)
            .await?;
        let (chunk_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks")
            .fetch_one(pool)
            .await?;
        let (last,): (Option<String>,) = sqlx::query_as("SELECT MAX(indexed_at) FROM files")
            .fetch_one(pool)
            .await?;
        let last_sync = last
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(IndexStats {
            file_count: file_count as u64,
            chunk_count: chunk_count as u64,
            sources,
            last_sync,
            index_size_bytes: self.connection.file_size().await,
        })
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.connection.close().await;
    }
}

fn push_source_filter(
    builder: &mut sqlx::QueryBuilder<'_, sqlx::Sqlite>,
    column: &str,
    sources: Option<&[MemorySource]>,
) {
    if let Some(sources) = sources {
        if !sources.is_empty() {
            builder.push(format!(" AND {column} IN ("));
            let mut separated = builder.separated(", ");
            for source in sources {
                separated.push_bind(source.as_str());
            }
            builder.push(")");
        }
    }
}

/// Recursively collect files with a recognized extension under `dir`, in
/// a stable order.
fn collect_recognized_files(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        let mut children: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        children.sort();
        for child in children {
            if child.is_dir() {
                stack.push(child);
            } else if child
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| RECOGNIZED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            {
                found.push(child);
            }
        }
    }

    found
}

/// Pick the `max_length`-character window containing the most distinct
/// query terms, sliding in 50-character strides; first window wins ties.
fn generate_snippet(text: &str, query: &str, max_length: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_length {
        return text.to_string();
    }

    let terms: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let mut best_pos = 0usize;
    let mut best_count = 0usize;
    let mut pos = 0usize;
    while pos < chars.len() - max_length {
        let window: String = chars[pos..pos + max_length].iter().collect();
        let window_lower = window.to_lowercase();
        let count = terms
            .iter()
            .filter(|term| window_lower.contains(term.as_str()))
            .count();
        if count > best_count {
            best_count = count;
            best_pos = pos;
        }
        pos += 50;
    }

    let mut snippet: String = chars[best_pos..best_pos + max_length].iter().collect();
    if best_pos > 0 {
        snippet = format!("...{}", snippet.chars().skip(3).collect::<String>());
    }
    if best_pos + max_length < chars.len() {
        let kept: String = snippet
            .chars()
            .take(snippet.chars().count().saturating_sub(3))
            .collect();
        snippet = format!("{kept}...");
    }
    snippet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_returns_short_text_whole() {
        assert_eq!(generate_snippet("short text", "text", 500), "short text");
    }

    #[test]
    fn snippet_centers_on_query_terms() {
        let mut text = "filler ".repeat(100);
        text.push_str("the needle is here ");
        text.push_str(&"filler ".repeat(100));
        let snippet = generate_snippet(&text, "needle", 120);
        assert!(snippet.contains("needle"));
        assert!(snippet.len() <= 126);
    }

    #[test]
    fn snippet_adds_ellipses_when_truncated() {
        let text = "a".repeat(400);
        let snippet = generate_snippet(&text, "zzz", 100);
        // No term match: window stays at the front, trailing ellipsis only.
        assert!(!snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn recognized_files_are_collected_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("inner");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("a.md"), "alpha").unwrap();
        std::fs::write(nested.join("b.txt"), "beta").unwrap();
        std::fs::write(nested.join("c.rs"), "ignored").unwrap();

        let files = collect_recognized_files(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|p| p.ends_with("a.md")));
        assert!(files.iter().any(|p| p.ends_with("b.txt")));
    }
}
