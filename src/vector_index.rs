//! Dense/ANN similarity search over chunk embeddings.
//!
//! [`VectorIndex`] is the capability trait seam over the external vector
//! database. [`InMemoryVectorIndex`] is a brute-force cosine reference
//! implementation, grounded on the teacher's `InMemoryStore::vector_search`
//! (`context-harness-core/src/store/memory.rs`) — a `RwLock<Vec<_>>` scanned
//! linearly and scored by cosine similarity, with no ANN structure.

use async_trait::async_trait;
use std::sync::RwLock;

/// One embedded chunk to be indexed, keyed by its opaque point id.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub point_id: String,
    pub vector: Vec<f32>,
}

/// One scored match returned from [`VectorIndex::search`].
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub point_id: String,
    pub score: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the given points.
    async fn upsert(&self, points: &[VectorPoint]) -> anyhow::Result<()>;
    /// Top-`top_k` points by cosine similarity to `query`, descending,
    /// dropping any match scoring below `cutoff`.
    async fn search(&self, query: &[f32], top_k: usize, cutoff: f32) -> anyhow::Result<Vec<VectorHit>>;
    /// Drop the given points by id. Used by the Knowledge DAO to retire a
    /// document's prior chunks before indexing its replacement chunks
    /// (point ids are freshly generated per ingest, so re-ingesting a
    /// `doc_id` never overwrites old points by id alone).
    async fn delete(&self, point_ids: &[String]) -> anyhow::Result<()>;
    /// Drop every indexed point.
    async fn reset(&self) -> anyhow::Result<()>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

/// Brute-force in-memory [`VectorIndex`] for tests and offline operation.
pub struct InMemoryVectorIndex {
    points: RwLock<Vec<VectorPoint>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            points: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, points: &[VectorPoint]) -> anyhow::Result<()> {
        let mut stored = self.points.write().unwrap();
        for p in points {
            stored.retain(|sp| sp.point_id != p.point_id);
            stored.push(p.clone());
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], top_k: usize, cutoff: f32) -> anyhow::Result<Vec<VectorHit>> {
        let points = self.points.read().unwrap();
        let mut scored: Vec<VectorHit> = points
            .iter()
            .map(|p| VectorHit {
                point_id: p.point_id.clone(),
                score: cosine_similarity(query, &p.vector),
            })
            .filter(|hit| hit.score >= cutoff)
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete(&self, point_ids: &[String]) -> anyhow::Result<()> {
        let mut stored = self.points.write().unwrap();
        stored.retain(|p| !point_ids.contains(&p.point_id));
        Ok(())
    }

    async fn reset(&self) -> anyhow::Result<()> {
        self.points.write().unwrap().clear();
        Ok(())
    }
}
