//! # Front Desk RAG
//!
//! **A low-latency retrieval-augmented-generation orchestrator for a mixed
//! chat workload in a medical front-office setting.**
//!
//! A single chat turn may ask a factual question, request a scheduling
//! action, or both. This crate classifies the turn, dispatches to the
//! correct subsystem(s) in parallel, composes a reply, and returns a
//! structured response envelope within a soft latency budget.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────┐   ┌────────────┐
//! │   Intent     │──▶│   Orchestrator    │──▶│  Session   │
//! │  Classifier  │   │  plan + dispatch  │   │   Memory   │
//! └──────────────┘   └─────────┬─────────┘   └────────────┘
//!                               │
//!                 ┌─────────────┴─────────────┐
//!                 ▼                           ▼
//!         ┌───────────────┐           ┌───────────────┐
//!         │ Knowledge DAO │           │   Entities +  │
//!         │ (hybrid RAG)  │           │   Schedule    │
//!         └───────┬───────┘           └───────────────┘
//!                 │
//!       ┌─────────┴─────────┐
//!       ▼                   ▼
//! ┌───────────┐       ┌───────────┐
//! │  Lexical  │       │  Vector   │
//! │  (BM25)   │       │  Index    │
//! └───────────┘       └───────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. The **intent classifier** ([`intent`]) labels the turn `{schedule,
//!    knowledge}` (both or neither are valid).
//! 2. The **orchestrator** ([`orchestrator`]) reads prior [`session`]
//!    context, resolves the reschedule-by-context rule, and branches.
//! 3. The knowledge branch runs the **Knowledge DAO**'s hybrid search
//!    ([`knowledge`]: lexical + dense retrieval, RRF fusion, MMR diversity
//!    selection) followed by sentence-level rescoring ([`extractor`]).
//! 4. The schedule branch runs **entity extraction** ([`entities`]) and the
//!    **schedule interface** ([`schedule`]), updating [`session`] on success.
//! 5. A dual-intent turn runs both branches concurrently and composes the
//!    reply from whichever succeeded.
//! 6. Every I/O-heavy step is cache-aside against the [`kv`] store:
//!    embeddings, query results, composed replies, session context, and
//!    appointments each have their own namespace/TTL.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Process-environment configuration and tuning knobs |
//! | [`models`] | Core data types: `Document`, `Chunk`, `Citation`, `ChatResponse`, ... |
//! | [`error`] | Per-boundary `thiserror` error enums |
//! | [`kv`] | `KvStore` trait + in-memory reference implementation, cache key derivation |
//! | [`vector_index`] | `VectorIndex` trait + brute-force cosine reference implementation |
//! | [`embedding`] | `EmbeddingProvider` trait, OpenAI/in-memory-hash implementations, cache wrapper |
//! | [`lexical`] | In-process BM25 index over the chunk corpus |
//! | [`chunk`] | Whitespace-tokenized document chunker |
//! | [`knowledge`] | Knowledge DAO: ingest, hybrid search, RRF fusion, MMR |
//! | [`extractor`] | Sentence segmentation and per-sentence rescoring |
//! | [`intent`] | Intent classifier: n-gram model + keyword fallback |
//! | [`entities`] | Time / person / location extraction |
//! | [`session`] | Per-session last-appointment memory |
//! | [`schedule`] | Appointment store proxy (create/reschedule/get/list/cancel) |
//! | [`orchestrator`] | Per-turn planning, dispatch, and reply composition |
//! | [`server`] | Axum HTTP server exposing the wire contract |
//!
//! ## Configuration
//!
//! The orchestrator is configured via process environment variables, with
//! an optional TOML overrides file for local tuning. See [`config`] for all
//! available settings and [`config::load_config`] for validation rules.

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod entities;
pub mod error;
pub mod extractor;
pub mod intent;
pub mod knowledge;
pub mod kv;
pub mod lexical;
pub mod models;
pub mod orchestrator;
pub mod schedule;
pub mod server;
pub mod session;
pub mod vector_index;
