//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]** — returns errors; used when embeddings are not configured.
//! - **[`OpenAiProvider`]** — calls the OpenAI embeddings API with batching, retry, and backoff.
//! - **[`InMemoryHashProvider`]** — deterministic, dependency-free fallback for
//!   tests and offline operation: hashes each token into a fixed-dimension vector.
//!
//! [`embed_cached`] wraps any provider with a cache-aside lookup against the
//! `emb:` namespace of a [`crate::kv::KvStore`], keyed by the
//! 100-char-truncated base64 of the input text.
//!
//! # Retry Strategy (`OpenAiProvider`)
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::{EmbeddingConfig, EMBEDDING_DIMS};
use crate::kv::{embedding_key, KvStore};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dims(&self) -> usize;
}

/// Embed a single query text.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let results = provider.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("empty embedding response"))
}

/// Embed `text`, serving from the `emb:` cache namespace when present and
/// writing the result back on a miss. A cache write failure is logged and
/// swallowed: cache entries are a strict performance optimization, never
/// required for correctness.
pub async fn embed_cached(
    provider: &dyn EmbeddingProvider,
    kv: &dyn KvStore,
    ttl: Duration,
    text: &str,
) -> Result<Vec<f32>> {
    let key = embedding_key(text);
    if let Some(bytes) = kv.get(&key).await.unwrap_or(None) {
        if let Ok(cached) = serde_json::from_slice::<Vec<f32>>(&bytes) {
            return Ok(cached);
        }
    }

    let vector = embed_query(provider, text).await?;

    if let Ok(bytes) = serde_json::to_vec(&vector) {
        if let Err(err) = kv.set(&key, bytes, Some(ttl)).await {
            tracing::warn!(error = %err, "failed to write embedding cache entry");
        }
    }

    Ok(vector)
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors, used when
/// `embedding.provider = "disabled"`.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("embedding provider is disabled")
    }

    fn dims(&self) -> usize {
        0
    }
}

// ============ In-memory hash provider ============

/// Deterministic, dependency-free embedding provider for tests and
/// offline operation. Hashes each whitespace token into a fixed-dimension
/// vector and averages token vectors into one document vector — no model
/// weights, no network I/O, but directionally sensitive to shared
/// vocabulary so cosine search and BM25 agree often enough for exercising
/// the retrieval pipeline.
pub struct InMemoryHashProvider {
    dims: usize,
}

impl InMemoryHashProvider {
    pub fn new() -> Self {
        Self {
            dims: EMBEDDING_DIMS,
        }
    }
}

impl Default for InMemoryHashProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_token(token: &str, dims: usize) -> Vec<f32> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut vector = vec![0.0f32; dims];
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    let mut state = hasher.finish();

    for slot in vector.iter_mut() {
        // xorshift64 to spread the single hash across all dimensions.
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let signed = (state % 2000) as i64 - 1000;
        *slot = signed as f32 / 1000.0;
    }
    vector
}

#[async_trait]
impl EmbeddingProvider for InMemoryHashProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let tokens: Vec<&str> = text.split_whitespace().collect();
                if tokens.is_empty() {
                    return vec![0.0; self.dims];
                }
                let mut sum = vec![0.0f32; self.dims];
                for token in &tokens {
                    let token_vec = hash_token(&token.to_lowercase(), self.dims);
                    for (s, t) in sum.iter_mut().zip(token_vec.iter()) {
                        *s += t;
                    }
                }
                let n = tokens.len() as f32;
                for s in sum.iter_mut() {
                    *s /= n;
                }
                sum
            })
            .collect())
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls the `POST /v1/embeddings` endpoint with the configured model.
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAiProvider {
    model: String,
    dims: usize,
    client: reqwest::Client,
    api_key: String,
    max_retries: u32,
}

impl OpenAiProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;

        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims: EMBEDDING_DIMS,
            client,
            api_key,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        embed_openai(
            &self.client,
            &self.api_key,
            &self.model,
            self.max_retries,
            texts,
        )
        .await
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

/// Call the OpenAI embeddings API with retry/backoff.
async fn embed_openai(
    client: &reqwest::Client,
    api_key: &str,
    model: &str,
    max_retries: u32,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return parse_openai_response(&json);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "OpenAI API error {}: {}",
                        status,
                        body_text
                    ));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("OpenAI API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("embedding failed after retries")))
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid OpenAI response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("invalid OpenAI response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        embeddings.push(vec);
    }

    Ok(embeddings)
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "in-memory-hash" => Ok(Box::new(InMemoryHashProvider::new())),
        "openai" => Ok(Box::new(OpenAiProvider::new(config)?)),
        other => bail!("unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKvStore;

    #[tokio::test]
    async fn disabled_provider_errors() {
        let provider = DisabledProvider;
        assert!(provider.embed(&["hi".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn in_memory_hash_provider_is_deterministic() {
        let provider = InMemoryHashProvider::new();
        let a = provider.embed(&["fever and cough".to_string()]).await.unwrap();
        let b = provider.embed(&["fever and cough".to_string()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), EMBEDDING_DIMS);
    }

    #[tokio::test]
    async fn in_memory_hash_provider_differs_for_different_text() {
        let provider = InMemoryHashProvider::new();
        let a = provider.embed(&["fever".to_string()]).await.unwrap();
        let b = provider.embed(&["appointment".to_string()]).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn embed_cached_serves_second_call_from_cache() {
        let provider = InMemoryHashProvider::new();
        let kv = InMemoryKvStore::new();
        let ttl = Duration::from_secs(60);

        let first = embed_cached(&provider, &kv, ttl, "what are your hours").await.unwrap();
        let second = embed_cached(&provider, &kv, ttl, "what are your hours").await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn create_provider_rejects_unknown() {
        let mut config = EmbeddingConfig::default();
        config.provider = "bogus".to_string();
        assert!(create_provider(&config).is_err());
    }

    #[test]
    fn create_provider_builds_in_memory_hash_by_default() {
        let config = EmbeddingConfig::default();
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.dims(), EMBEDDING_DIMS);
    }
}
