//! Line-based text chunking with token-budgeted overlap.

use sha2::{Digest, Sha256};

use crate::tokens::estimate_tokens;

use super::{Chunk, MemorySource};

/// Short content hash used for change detection: the first 16 hex chars
/// of the SHA-256 digest.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let hex = digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();
    hex[..16].to_string()
}

/// Split `text` into overlapping chunks.
///
/// Lines are appended to the current chunk until adding the next line
/// would exceed `chunk_size_tokens`; the chunk is then closed and the
/// next one is seeded with the tail lines of the closed chunk whose
/// cumulative cost stays within `chunk_overlap_tokens`. Line numbers are
/// 1-based and inclusive; the final partial chunk is always emitted.
pub fn chunk_text(
    text: &str,
    path: &str,
    source: MemorySource,
    chunk_size_tokens: usize,
    chunk_overlap_tokens: usize,
) -> Vec<Chunk> {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut chunks = Vec::new();

    let mut current_lines: Vec<&str> = Vec::new();
    let mut current_tokens = 0usize;
    let mut start_line = 1u32;

    for (i, line) in lines.iter().enumerate() {
        let line_number = (i + 1) as u32;
        let line_tokens = estimate_tokens(line);

        if current_tokens + line_tokens > chunk_size_tokens && !current_lines.is_empty() {
            let chunk_body = current_lines.join("\n");
            chunks.push(Chunk {
                id: None,
                path: path.to_string(),
                source,
                start_line,
                end_line: line_number - 1,
                hash: content_hash(&chunk_body),
                text: chunk_body,
                embedding: None,
            });

            // Seed the next chunk with the closed chunk's tail.
            let mut overlap_tokens = 0usize;
            let mut overlap_lines: Vec<&str> = Vec::new();
            for tail in current_lines.iter().rev() {
                let cost = estimate_tokens(tail);
                if overlap_tokens + cost > chunk_overlap_tokens {
                    break;
                }
                overlap_lines.insert(0, tail);
                overlap_tokens += cost;
            }

            start_line = line_number - overlap_lines.len() as u32;
            current_lines = overlap_lines;
            current_tokens = overlap_tokens;
        }

        current_lines.push(line);
        current_tokens += line_tokens;
    }

    if !current_lines.is_empty() {
        let chunk_body = current_lines.join("\n");
        chunks.push(Chunk {
            id: None,
            path: path.to_string(),
            source,
            start_line,
            end_line: lines.len() as u32,
            hash: content_hash(&chunk_body),
            text: chunk_body,
            embedding: None,
        });
    }

    chunks
}
