//! Front Desk RAG — orchestrator process entry point.
//!
//! Loads configuration, constructs the capability implementations each
//! component is built against (embedding provider, vector index, KV store,
//! intent model), and serves the wire contract over HTTP until the process
//! receives a shutdown signal.

mod chunk;
mod config;
mod embedding;
mod entities;
mod error;
mod extractor;
mod intent;
mod knowledge;
mod kv;
mod lexical;
mod models;
mod orchestrator;
mod schedule;
mod server;
mod session;
mod vector_index;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use embedding::{create_provider, EmbeddingProvider};
use intent::{IntentModel, KeywordIntentModel, NgramIntentModel};
use knowledge::KnowledgeDao;
use kv::{InMemoryKvStore, KvStore};
use orchestrator::Orchestrator;
use vector_index::{InMemoryVectorIndex, VectorIndex};

#[derive(Parser)]
#[command(
    name = "frontdeskd",
    about = "Low-latency hybrid-retrieval RAG orchestrator for a medical front-office chat workload",
    version
)]
struct Cli {
    /// Path to an optional TOML overrides file for retrieval/chunking tuning knobs.
    #[arg(long, default_value = "./config/frontdesk.toml")]
    config: PathBuf,

    /// Path to a serialized intent n-gram weight table; falls back to the
    /// keyword classifier when absent or malformed.
    #[arg(long, default_value = "./models/intent_ngrams.json")]
    intent_model: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let overrides = cli.config.exists().then_some(cli.config.as_path());
    let cfg = config::load_config(overrides)?;

    if cfg.vector_db.url.is_some() {
        tracing::warn!(
            "VECTOR_DB_URL is set but this build only wires an in-memory VectorIndex; the value is ignored"
        );
    }
    if cfg.kv_store.url.is_some() {
        tracing::warn!(
            "KV_STORE_URL is set but this build only wires an in-memory KvStore; the value is ignored"
        );
    }

    let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
    let vector_index: Arc<dyn VectorIndex> = Arc::new(InMemoryVectorIndex::new());
    let embedding: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&cfg.embedding)?);

    let intent_model: Arc<dyn IntentModel> = match NgramIntentModel::load_from_file(&cli.intent_model) {
        Some(model) => {
            tracing::info!(path = %cli.intent_model.display(), "loaded intent n-gram model");
            Arc::new(model)
        }
        None => {
            tracing::info!("intent n-gram model unavailable; falling back to keyword classifier");
            Arc::new(KeywordIntentModel)
        }
    };

    let knowledge = Arc::new(KnowledgeDao::new(
        embedding.clone(),
        vector_index,
        kv.clone(),
        cfg.retrieval.clone(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        knowledge.clone(),
        embedding,
        kv.clone(),
        intent_model,
        cfg.retrieval.clone(),
    ));

    let cfg = Arc::new(cfg);
    let port = cfg.port;
    let router = server::build_router(orchestrator, knowledge, kv, cfg);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "frontdeskd listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received, draining in-flight turns");
}
