//! Answer Extractor: sentence-level rescoring over a retrieved chunk.
//!
//! Given a query and the top-1 chunk's text, returns the single best
//! sentence. Grounded on the teacher's `search.rs` concurrent-candidate-
//! fetch idiom (issue the query embedding and every sentence embedding as
//! one concurrent batch) and on [`crate::lexical`]'s BM25 formula, reused
//! here at a fixed `avgdl=20` with `idf` treated as 0.

use std::time::Duration;

use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::RetrievalConfig;
use crate::embedding::{embed_cached, EmbeddingProvider};
use crate::kv::KvStore;
use crate::vector_index::cosine_similarity;

static BANNER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"===[^=]+===").unwrap());
static SENTENCE_SPLIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]\s+(?=[A-Z])").unwrap());

const MIN_SENTENCE_LEN: usize = 10;
const MAX_SENTENCE_LEN: usize = 500;
const BM25_LOCAL_AVGDL: f64 = 20.0;

/// Segment `chunk_text` into candidate sentences.
fn segment_sentences(chunk_text: &str) -> Vec<String> {
    let stripped = BANNER_RE.replace_all(chunk_text, " ");

    let mut sentences: Vec<String> = Vec::new();
    for line in stripped.split("\n\n") {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        for piece in SENTENCE_SPLIT_RE.split(line) {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            if piece.len() > 200 || !ends_with_terminal_punctuation(piece) {
                for sub in piece.split(". ") {
                    let sub = sub.trim();
                    if sub.is_empty() {
                        continue;
                    }
                    let terminated = if ends_with_terminal_punctuation(sub) {
                        sub.to_string()
                    } else {
                        format!("{sub}.")
                    };
                    sentences.push(terminated);
                }
            } else {
                sentences.push(piece.to_string());
            }
        }
    }

    let mut seen = std::collections::HashSet::new();
    sentences
        .into_iter()
        .filter(|s| s.len() > MIN_SENTENCE_LEN && s.len() <= MAX_SENTENCE_LEN)
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

fn ends_with_terminal_punctuation(s: &str) -> bool {
    matches!(s.chars().last(), Some('.') | Some('!') | Some('?'))
}

/// `bm25_local`: the BM25 formula at a fixed average document length of 20
/// tokens with `idf` treated as 0, so it acts as a normalized TF contribution.
fn bm25_local(query_terms: &[String], sentence: &str, k1: f64, b: f64) -> f64 {
    let tokens: Vec<String> = sentence
        .split_whitespace()
        .map(|t| {
            t.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.is_empty() {
        return 0.0;
    }

    let length = tokens.len() as f64;
    let len_norm = 1.0 - b + b * (length / BM25_LOCAL_AVGDL);

    let mut score = 0.0;
    for term in query_terms {
        let tf = tokens.iter().filter(|t| *t == term).count() as f64;
        if tf == 0.0 {
            continue;
        }
        let numer = tf * (k1 + 1.0);
        let denom = tf + k1 * len_norm;
        score += numer / denom;
    }
    score
}

fn tokenize_query(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|t| {
            t.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

/// Extract the single best answer sentence from `chunk_text` for `query`.
pub async fn extract_answer(
    embedding: &dyn EmbeddingProvider,
    kv: &dyn KvStore,
    config: &RetrievalConfig,
    query: &str,
    chunk_text: &str,
) -> String {
    let sentences = segment_sentences(chunk_text);

    if sentences.is_empty() {
        return chunk_text.to_string();
    }
    if sentences.len() == 1 {
        return sentences.into_iter().next().unwrap();
    }

    let ttl = Duration::from_secs(config.embedding_cache_ttl_secs);

    let query_embed_fut = embed_cached(embedding, kv, ttl, query);
    let sentence_embed_futs: Vec<_> = sentences
        .iter()
        .map(|s| embed_cached(embedding, kv, ttl, s))
        .collect();

    // Query embedding and every sentence embedding are issued as one
    // concurrent batch: `join_all` polls all sentence futures
    // together, and the outer `tokio::join!` polls that batch alongside the
    // query embedding future.
    let (query_vec_result, sentence_vec_results) =
        tokio::join!(query_embed_fut, join_all(sentence_embed_futs));

    let query_vec = query_vec_result.ok();
    let query_terms = tokenize_query(query);

    let mut best_sentence = sentences[0].clone();
    let mut best_score = f64::NEG_INFINITY;

    for (sentence, vec_result) in sentences.iter().zip(sentence_vec_results.into_iter()) {
        let cosine = match (&query_vec, vec_result.ok()) {
            (Some(q), Some(s)) => cosine_similarity(q, &s) as f64,
            _ => 0.0,
        };
        let lexical = bm25_local(&query_terms, sentence, config.bm25_k1, config.bm25_b);
        let score = 0.7 * cosine + 0.3 * lexical;

        if score > best_score {
            best_score = score;
            best_sentence = sentence.clone();
        }
    }

    best_sentence.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::InMemoryHashProvider;
    use crate::kv::InMemoryKvStore;

    #[test]
    fn segments_strip_banners_and_dedup() {
        let text = "===SECTION===\nWe accept Medicare. We accept Medicare. Visits are by appointment only.";
        let sentences = segment_sentences(text);
        assert_eq!(sentences.iter().filter(|s| s.contains("Medicare")).count(), 1);
    }

    #[test]
    fn segments_drop_short_fragments() {
        let text = "Ok. This is a much longer sentence that should survive filtering.";
        let sentences = segment_sentences(text);
        assert!(sentences.iter().all(|s| s.len() > MIN_SENTENCE_LEN));
    }

    #[test]
    fn segments_cap_long_sentences() {
        let long_sentence = "word ".repeat(200);
        let sentences = segment_sentences(&long_sentence);
        assert!(sentences.iter().all(|s| s.len() <= MAX_SENTENCE_LEN));
    }

    #[tokio::test]
    async fn extract_answer_returns_whole_chunk_when_no_sentences_segment() {
        let embedding = InMemoryHashProvider::new();
        let kv = InMemoryKvStore::new();
        let config = RetrievalConfig::default();

        let text = "a";
        let answer = extract_answer(&embedding, &kv, &config, "anything", text).await;
        assert_eq!(answer, "a");
    }

    #[tokio::test]
    async fn extract_answer_returns_single_sentence_directly() {
        let embedding = InMemoryHashProvider::new();
        let kv = InMemoryKvStore::new();
        let config = RetrievalConfig::default();

        let text = "Patients arriving more than fifteen minutes late will be rescheduled automatically today.";
        let answer = extract_answer(&embedding, &kv, &config, "late policy", text).await;
        assert_eq!(answer, text);
    }

    #[tokio::test]
    async fn extract_answer_picks_best_matching_sentence() {
        let embedding = InMemoryHashProvider::new();
        let kv = InMemoryKvStore::new();
        let config = RetrievalConfig::default();

        let text = "Our office accepts most major insurance carriers. Parking is available behind the building. Please arrive fifteen minutes early for your appointment.";
        let answer = extract_answer(&embedding, &kv, &config, "insurance carriers accepted", text).await;
        assert!(answer.contains("insurance"));
    }
}
