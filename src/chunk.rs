//! Whitespace-tokenized text chunker.
//!
//! Splits document body text into [`Chunk`]s by walking whitespace-
//! separated words and packing them into chunks up to a soft cap of
//! `max_tokens` approximate tokens (token ≈ 4 characters), preserving
//! document order with a dense, 0-based `chunk_index`.
//!
//! The `CHARS_PER_TOKEN` constant and the "guarantee at least one chunk"
//! fallback follow the shape of `chunk_text`/`make_chunk` elsewhere in this
//! codebase's lineage; the splitting algorithm itself differs
//! (paragraph-boundary → plain whitespace-word packing) since chunking
//! here is defined purely by approximate token count, not paragraph
//! structure. A per-chunk content hash would only serve a connector
//! staleness-detection path this crate has no use for, so it is dropped
//! rather than carried as dead weight.

use uuid::Uuid;

use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split `text` into chunks of up to `max_tokens` approximate tokens each,
/// packing whitespace-separated words in order. Returns chunks with
/// contiguous indices starting at 0; always returns at least one chunk.
pub fn chunk_text(doc_id: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    let words: Vec<&str> = text.split_whitespace().collect();

    if words.is_empty() {
        return vec![make_chunk(doc_id, 0, text)];
    }

    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_chars = 0usize;
    let mut chunk_index: i64 = 0;

    for word in words {
        let added_len = if current.is_empty() {
            word.len()
        } else {
            word.len() + 1 // +1 for the joining space
        };

        if current_chars + added_len > max_chars && !current.is_empty() {
            chunks.push(make_chunk(doc_id, chunk_index, &current.join(" ")));
            chunk_index += 1;
            current.clear();
            current_chars = 0;
        }

        current.push(word);
        current_chars += if current.len() == 1 {
            word.len()
        } else {
            word.len() + 1
        };
    }

    if !current.is_empty() {
        chunks.push(make_chunk(doc_id, chunk_index, &current.join(" ")));
    }

    if chunks.is_empty() {
        chunks.push(make_chunk(doc_id, 0, text.trim()));
    }

    chunks
}

fn make_chunk(doc_id: &str, index: i64, text: &str) -> Chunk {
    Chunk {
        point_id: Uuid::new_v4().to_string(),
        doc_id: doc_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        embedding: Vec::new(),
        tags: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_text_is_a_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn empty_text_yields_one_chunk() {
        let chunks = chunk_text("doc1", "", 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn long_text_splits_into_multiple_chunks() {
        let text = (0..100)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text("doc1", &text, 10);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
    }

    #[test]
    fn chunk_indices_are_dense_and_ordered() {
        let text = (0..50)
            .map(|i| format!("token-{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text("doc1", &text, 8);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
        let rejoined = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(rejoined, text);
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let c1 = chunk_text("doc1", text, 3);
        let c2 = chunk_text("doc1", text, 3);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.chunk_index, b.chunk_index);
        }
    }

    #[test]
    fn single_oversized_word_still_gets_its_own_chunk() {
        let huge_word = "x".repeat(1000);
        let text = format!("short {}", huge_word);
        let chunks = chunk_text("doc1", &text, 5);
        assert!(chunks.iter().any(|c| c.text.contains(&huge_word)));
    }
}
