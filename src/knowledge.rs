//! Knowledge DAO: chunking, ingest, hybrid search, fusion, MMR, caching.
//!
//! Grounded on the teacher's `search.rs` (`search_documents`: parallel
//! keyword + vector candidate fetch, normalize, merge, sort, truncate) for
//! the "run two retrieval paths concurrently, fuse, return" shape —
//! generalized here from min-max/weighted-merge to Reciprocal Rank Fusion
//! plus Maximal Marginal Relevance — and on `ingest.rs`'s `run_sync`
//! ("chunk then embed inline, tolerate embedding failure, report counts")
//! for the ingest shape, with connector fan-in and checkpointing dropped
//! (documents arrive over the wire, not via a connector) and an atomic
//! lexical-index rebuild added so the index and corpus never observably
//! diverge.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::chunk::chunk_text;
use crate::config::RetrievalConfig;
use crate::embedding::{embed_cached, EmbeddingProvider};
use crate::kv::{query_key, KvStore};
use crate::lexical::LexicalIndex;
use crate::models::{Citation, Document};
use crate::vector_index::{VectorIndex, VectorPoint};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct CachedHit {
    point_id: String,
    doc_id: String,
    chunk_index: i64,
    text: String,
    score: f64,
}

struct CorpusEntry {
    doc_id: String,
    chunk_index: i64,
    text: String,
}

/// Hybrid retrieval + ingest over a chunk corpus, backed by a
/// [`LexicalIndex`], a [`VectorIndex`], an [`EmbeddingProvider`], and a
/// [`KvStore`] for the cache layers.
pub struct KnowledgeDao {
    embedding: Arc<dyn EmbeddingProvider>,
    vector_index: Arc<dyn VectorIndex>,
    lexical: Arc<LexicalIndex>,
    kv: Arc<dyn KvStore>,
    config: RetrievalConfig,
    corpus: RwLock<HashMap<String, CorpusEntry>>,
}

impl KnowledgeDao {
    pub fn new(
        embedding: Arc<dyn EmbeddingProvider>,
        vector_index: Arc<dyn VectorIndex>,
        kv: Arc<dyn KvStore>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedding,
            vector_index,
            lexical: Arc::new(LexicalIndex::new(config.bm25_k1, config.bm25_b)),
            kv,
            config,
            corpus: RwLock::new(HashMap::new()),
        }
    }

    /// Chunk, embed, and index every document. Replaces any chunks
    /// previously ingested under the same `doc_id`. Returns
    /// `(document_count, chunk_count)`.
    pub async fn upsert(&self, documents: &[Document]) -> anyhow::Result<(usize, usize)> {
        let mut total_chunks = 0usize;

        for doc in documents {
            let stale_point_ids: Vec<String> = {
                let mut corpus = self.corpus.write().await;
                let stale: Vec<String> = corpus
                    .iter()
                    .filter(|(_, entry)| entry.doc_id == doc.id)
                    .map(|(point_id, _)| point_id.clone())
                    .collect();
                corpus.retain(|_, entry| entry.doc_id != doc.id);
                stale
            };
            if !stale_point_ids.is_empty() {
                self.vector_index.delete(&stale_point_ids).await?;
            }

            let chunks = chunk_text(&doc.id, &doc.text, 512);
            let mut points = Vec::with_capacity(chunks.len());

            for chunk in &chunks {
                match embed_cached(
                    self.embedding.as_ref(),
                    self.kv.as_ref(),
                    Duration::from_secs(self.config.embedding_cache_ttl_secs),
                    &chunk.text,
                )
                .await
                {
                    Ok(vector) => points.push(VectorPoint {
                        point_id: chunk.point_id.clone(),
                        vector,
                    }),
                    Err(err) => {
                        tracing::warn!(
                            doc_id = %doc.id,
                            chunk_index = chunk.chunk_index,
                            error = %err,
                            "embedding failed for chunk; indexing lexically only"
                        );
                    }
                }

                let mut corpus = self.corpus.write().await;
                corpus.insert(
                    chunk.point_id.clone(),
                    CorpusEntry {
                        doc_id: doc.id.clone(),
                        chunk_index: chunk.chunk_index,
                        text: chunk.text.clone(),
                    },
                );
            }

            if !points.is_empty() {
                self.vector_index.upsert(&points).await?;
            }

            total_chunks += chunks.len();
        }

        self.rebuild_lexical().await;

        Ok((documents.len(), total_chunks))
    }

    /// Drop the vector collection and clear the lexical index. Also
    /// invalidates every `query:`/`knowledge:` cache entry rather than
    /// leaving them to expire naturally, so a reset is immediately
    /// reflected rather than served stale from cache.
    pub async fn reset(&self) -> anyhow::Result<()> {
        self.vector_index.reset().await?;
        self.corpus.write().await.clear();
        self.lexical.clear().await;
        if let Err(err) = self.kv.clear_prefix("query:").await {
            tracing::warn!(error = %err, "failed to clear query: cache on reset");
        }
        if let Err(err) = self.kv.clear_prefix("knowledge:").await {
            tracing::warn!(error = %err, "failed to clear knowledge: cache on reset");
        }
        Ok(())
    }

    async fn rebuild_lexical(&self) {
        let corpus = self.corpus.read().await;
        let entries: Vec<(String, String)> = corpus
            .iter()
            .map(|(point_id, entry)| (point_id.clone(), entry.text.clone()))
            .collect();
        drop(corpus);
        self.lexical.rebuild(&entries).await;
    }

    /// Hybrid search: cache probe, parallel lexical + dense retrieval, RRF
    /// fusion, MMR diversity selection, best-effort cache store.
    pub async fn search(&self, query: &str) -> anyhow::Result<Vec<Citation>> {
        let cache_key = query_key(query);
        if let Ok(Some(bytes)) = self.kv.get(&cache_key).await {
            if let Ok(hits) = serde_json::from_slice::<Vec<CachedHit>>(&bytes) {
                return Ok(to_citations(&hits));
            }
        }

        let (lexical_ranked, dense_ranked) =
            tokio::join!(self.lexical_candidates(query), self.dense_candidates(query));

        let fused = reciprocal_rank_fusion(&lexical_ranked, &dense_ranked, self.config.rrf_k);
        let selected = self.mmr_select(fused).await;

        if let Ok(bytes) = serde_json::to_vec(&selected) {
            let kv = self.kv.clone();
            let ttl = Duration::from_secs(self.config.query_cache_ttl_secs);
            tokio::spawn(async move {
                if let Err(err) = kv.set(&cache_key, bytes, Some(ttl)).await {
                    tracing::warn!(error = %err, "failed to write query: cache entry");
                }
            });
        }

        Ok(to_citations(&selected))
    }

    async fn lexical_candidates(&self, query: &str) -> Vec<(String, f64)> {
        self.lexical.search(query, self.config.candidate_n).await
    }

    async fn dense_candidates(&self, query: &str) -> Vec<(String, f64)> {
        let vector = match embed_cached(
            self.embedding.as_ref(),
            self.kv.as_ref(),
            Duration::from_secs(self.config.embedding_cache_ttl_secs),
            query,
        )
        .await
        {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(error = %err, "embedding provider failed; dense branch degraded to empty");
                return Vec::new();
            }
        };

        match self
            .vector_index
            .search(&vector, self.config.candidate_n, self.config.dense_cutoff)
            .await
        {
            Ok(hits) => hits.into_iter().map(|h| (h.point_id, h.score as f64)).collect(),
            Err(err) => {
                tracing::warn!(error = %err, "vector index search failed; dense branch degraded to empty");
                Vec::new()
            }
        }
    }

    async fn mmr_select(&self, fused: Vec<(String, f64)>) -> Vec<CachedHit> {
        let corpus = self.corpus.read().await;
        let candidates: Vec<(String, f64)> = fused
            .into_iter()
            .take(self.config.candidate_n)
            .collect();

        if candidates.is_empty() {
            return Vec::new();
        }

        let lambda = self.config.mmr_lambda;
        let mut remaining = candidates;
        let mut selected: Vec<(String, f64)> = Vec::new();

        let top = remaining.remove(0);
        selected.push(top);

        while selected.len() < self.config.top_k && !remaining.is_empty() {
            let mut best_idx = 0usize;
            let mut best_score = f64::NEG_INFINITY;

            for (idx, (point_id, rel)) in remaining.iter().enumerate() {
                let Some(entry) = corpus.get(point_id) else {
                    continue;
                };
                let max_sim = selected
                    .iter()
                    .filter_map(|(sel_id, _)| corpus.get(sel_id))
                    .map(|sel_entry| jaccard_similarity(&entry.text, &sel_entry.text))
                    .fold(0.0_f64, f64::max);

                let mmr_score = lambda * rel - (1.0 - lambda) * max_sim;
                if mmr_score > best_score {
                    best_score = mmr_score;
                    best_idx = idx;
                }
            }

            selected.push(remaining.remove(best_idx));
        }

        selected
            .into_iter()
            .filter_map(|(point_id, score)| {
                corpus.get(&point_id).map(|entry| CachedHit {
                    point_id,
                    doc_id: entry.doc_id.clone(),
                    chunk_index: entry.chunk_index,
                    text: entry.text.clone(),
                    score,
                })
            })
            .collect()
    }

    /// The top-1 chunk's full text for a given query, used by the Answer
    /// Extractor. Returns `None` if `search` produced no results.
    pub async fn top_chunk_text(&self, query: &str) -> anyhow::Result<Option<(String, String)>> {
        let citations = self.search(query).await?;
        let Some(top) = citations.first() else {
            return Ok(None);
        };
        let corpus = self.corpus.read().await;
        // Corpus is keyed by point_id, not (doc_id, chunk_index); scan once.
        let text = corpus
            .values()
            .find(|entry| entry.doc_id == top.doc_id && entry.chunk_index == top.chunk_index)
            .map(|entry| entry.text.clone());
        Ok(text.map(|t| (top.doc_id.clone(), t)))
    }
}

fn to_citations(hits: &[CachedHit]) -> Vec<Citation> {
    hits.iter()
        .enumerate()
        .map(|(idx, hit)| Citation {
            doc_id: hit.doc_id.clone(),
            chunk_index: hit.chunk_index,
            score: (hit.score * 100.0).round() / 100.0,
            r#ref: idx + 1,
        })
        .collect()
}

/// Reciprocal Rank Fusion (k=60 by config): `score(c) = Σ 1/(k + rank_s(c) + 1)`
/// over sources where `c` appears. Ties broken by lexical-source rank,
/// then by `point_id` lexicographic.
fn reciprocal_rank_fusion(
    lexical: &[(String, f64)],
    dense: &[(String, f64)],
    k: f64,
) -> Vec<(String, f64)> {
    let mut lexical_rank: HashMap<&str, usize> = HashMap::new();
    for (rank, (id, _)) in lexical.iter().enumerate() {
        lexical_rank.insert(id.as_str(), rank);
    }
    let mut dense_rank: HashMap<&str, usize> = HashMap::new();
    for (rank, (id, _)) in dense.iter().enumerate() {
        dense_rank.insert(id.as_str(), rank);
    }

    let unique_ids: HashSet<&str> = lexical_rank.keys().chain(dense_rank.keys()).copied().collect();
    let mut all_ids: Vec<&str> = unique_ids.into_iter().collect();
    all_ids.sort_unstable();

    let mut scored: Vec<(String, f64)> = all_ids
        .into_iter()
        .map(|id| {
            let mut score = 0.0;
            if let Some(&rank) = lexical_rank.get(id) {
                score += 1.0 / (k + rank as f64 + 1.0);
            }
            if let Some(&rank) = dense_rank.get(id) {
                score += 1.0 / (k + rank as f64 + 1.0);
            }
            (id.to_string(), score)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let a_rank = lexical_rank.get(a.0.as_str()).copied().unwrap_or(usize::MAX);
                let b_rank = lexical_rank.get(b.0.as_str()).copied().unwrap_or(usize::MAX);
                a_rank.cmp(&b_rank)
            })
            .then_with(|| a.0.cmp(&b.0))
    });

    scored
}

/// Jaccard similarity over lowercased whitespace-tokenized word sets.
fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = a.split_whitespace().map(|w| w.to_lowercase()).collect();
    let set_b: HashSet<String> = b.split_whitespace().map(|w| w.to_lowercase()).collect();

    if set_a.is_empty() && set_b.is_empty() {
        return 0.0;
    }

    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}
