//! Process configuration.
//!
//! The orchestrator is configured via process environment variables:
//! `PORT`, the vector DB URL/API key, the KV store URL, and the embedding
//! provider API key. Collection name and embedding dimension/metric are
//! fixed, not configurable. Retrieval/chunking/MMR/fusion tuning knobs
//! default to sensible values but can be overridden by an optional TOML
//! file for local experimentation, loaded with the same `serde`+`toml`,
//! validate-on-load shape used elsewhere for file-based configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Fixed embedding vector dimensionality.
pub const EMBEDDING_DIMS: usize = 512;
/// Fixed vector DB collection name.
pub const COLLECTION_NAME: &str = "frontdesk-knowledge";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub vector_db: BackingServiceConfig,
    #[serde(default)]
    pub kv_store: BackingServiceConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            vector_db: BackingServiceConfig::default(),
            kv_store: BackingServiceConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            chunking: ChunkingConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    3002
}

/// URL/API key pair shared by the vector DB and KV store backing services.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackingServiceConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    /// `"disabled"`, `"openai"`, or `"in-memory-hash"` (test fallback).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "in-memory-hash".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// Retrieval tuning knobs: candidate fan-out, RRF k, MMR lambda,
/// dense-score cutoff, cache TTLs.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_candidate_n")]
    pub candidate_n: usize,
    #[serde(default = "default_bm25_k1")]
    pub bm25_k1: f64,
    #[serde(default = "default_bm25_b")]
    pub bm25_b: f64,
    #[serde(default = "default_dense_cutoff")]
    pub dense_cutoff: f32,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f64,
    #[serde(default = "default_query_cache_ttl")]
    pub query_cache_ttl_secs: u64,
    #[serde(default = "default_knowledge_cache_ttl")]
    pub knowledge_cache_ttl_secs: u64,
    #[serde(default = "default_embedding_cache_ttl")]
    pub embedding_cache_ttl_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            candidate_n: default_candidate_n(),
            bm25_k1: default_bm25_k1(),
            bm25_b: default_bm25_b(),
            dense_cutoff: default_dense_cutoff(),
            rrf_k: default_rrf_k(),
            mmr_lambda: default_mmr_lambda(),
            query_cache_ttl_secs: default_query_cache_ttl(),
            knowledge_cache_ttl_secs: default_knowledge_cache_ttl(),
            embedding_cache_ttl_secs: default_embedding_cache_ttl(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_candidate_n() -> usize {
    8
}
fn default_bm25_k1() -> f64 {
    1.2
}
fn default_bm25_b() -> f64 {
    0.75
}
fn default_dense_cutoff() -> f32 {
    0.2
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_mmr_lambda() -> f64 {
    0.5
}
fn default_query_cache_ttl() -> u64 {
    30
}
fn default_knowledge_cache_ttl() -> u64 {
    600
}
fn default_embedding_cache_ttl() -> u64 {
    3600
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    512
}

/// Load configuration from the process environment, optionally layered
/// with a TOML overrides file.
pub fn load_config(overrides_path: Option<&Path>) -> Result<Config> {
    let mut config = match overrides_path {
        Some(path) if path.exists() => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            toml::from_str(&content).with_context(|| "failed to parse config file")?
        }
        _ => Config::default(),
    };

    if let Ok(port) = std::env::var("PORT") {
        config.port = port
            .parse()
            .with_context(|| format!("invalid PORT value: {}", port))?;
    }
    if let Ok(url) = std::env::var("VECTOR_DB_URL") {
        config.vector_db.url = Some(url);
    }
    if let Ok(key) = std::env::var("VECTOR_DB_API_KEY") {
        config.vector_db.api_key = Some(key);
    }
    if let Ok(url) = std::env::var("KV_STORE_URL") {
        config.kv_store.url = Some(url);
    }
    if let Ok(key) = std::env::var("EMBEDDING_API_KEY") {
        config.embedding.model.get_or_insert_with(String::new);
        config.embedding.provider = "openai".to_string();
        std::env::set_var("OPENAI_API_KEY", key);
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if !(0.0..=1.0).contains(&config.retrieval.mmr_lambda) {
        anyhow::bail!("retrieval.mmr_lambda must be in [0.0, 1.0]");
    }
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be > 0");
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "in-memory-hash" => {}
        other => anyhow::bail!(
            "unknown embedding provider: '{}'. Must be disabled, openai, or in-memory-hash.",
            other
        ),
    }
    Ok(())
}
