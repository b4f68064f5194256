//! HTTP server exposing the orchestrator over the wire contract.
//!
//! Grounded on the teacher's `server.rs`: the same `AppState`/`AppError`/
//! `bad_request`/`not_found`/`internal_error` constructors and permissive
//! CORS layer, with this crate's ten routes in place of the
//! teacher's four, and one addition (`service_unavailable`, 503) for
//! `/health`'s backing-service-outage case. `embeddings_disabled` is
//! dropped — this crate's embedding failures degrade the dense retrieval
//! branch rather than rejecting the request.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::config::Config;
use crate::knowledge::KnowledgeDao;
use crate::kv::{self, KvStore};
use crate::models::{Appointment, ChatResponse, Document};
use crate::orchestrator::Orchestrator;
use crate::schedule;

#[derive(Default)]
struct Stats {
    document_count: AtomicUsize,
    chunk_count: AtomicUsize,
    sessions_seen: StdRwLock<HashSet<String>>,
}

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
    knowledge: Arc<KnowledgeDao>,
    kv: Arc<dyn KvStore>,
    config: Arc<Config>,
    stats: Arc<Stats>,
}

/// Build the router for the orchestrator's wire contract.
pub fn build_router(
    orchestrator: Arc<Orchestrator>,
    knowledge: Arc<KnowledgeDao>,
    kv: Arc<dyn KvStore>,
    config: Arc<Config>,
) -> Router {
    let state = AppState {
        orchestrator,
        knowledge,
        kv,
        config,
        stats: Arc::new(Stats::default()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/knowledge", post(handle_ingest))
        .route("/tools/schedule_appointment", post(handle_schedule_tool))
        .route("/tools/reschedule_appointment", post(handle_reschedule_tool))
        .route("/appointments", get(handle_list_appointments))
        .route("/appointments", delete(handle_cancel_all_appointments))
        .route("/appointments/{id}", get(handle_get_appointment))
        .route("/appointments/{id}", delete(handle_cancel_appointment))
        .route("/cache/clear", delete(handle_cache_clear))
        .route("/knowledge/reset", delete(handle_knowledge_reset))
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .route("/debug/sessions", get(handle_debug_sessions))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

struct AppError {
    status: StatusCode,
    error: String,
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.error,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        error: message.into(),
        details: None,
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        error: message.into(),
        details: None,
    }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        error: "internal error".to_string(),
        details: Some(message.into()),
    }
}

fn service_unavailable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        error: message.into(),
        details: None,
    }
}

fn normalize_slot_iso(raw: &str) -> Result<String, AppError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.to_rfc3339())
        .map_err(|_| bad_request(format!("invalid slot time: '{raw}'")))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    session_id: Option<String>,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    let session_id = req.session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    state
        .stats
        .sessions_seen
        .write()
        .unwrap()
        .insert(session_id.clone());

    let response = state.orchestrator.handle_turn(&req.message, &session_id).await;
    Ok(Json(response))
}

// ============ POST /knowledge ============

#[derive(Deserialize)]
struct IngestRequest {
    documents: Vec<Document>,
}

#[derive(Serialize)]
struct IngestResponse {
    ok: bool,
    document_count: usize,
    chunk_count: usize,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, AppError> {
    if req.documents.is_empty() {
        return Err(bad_request("documents must not be empty"));
    }
    for doc in &req.documents {
        if doc.id.trim().is_empty() || doc.text.trim().is_empty() {
            return Err(bad_request("each document requires a non-empty id and text"));
        }
    }

    let (document_count, chunk_count) = state
        .knowledge
        .upsert(&req.documents)
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    state.stats.document_count.fetch_add(document_count, Ordering::Relaxed);
    state.stats.chunk_count.fetch_add(chunk_count, Ordering::Relaxed);

    Ok(Json(IngestResponse {
        ok: true,
        document_count,
        chunk_count,
    }))
}

// ============ POST /tools/schedule_appointment ============

#[derive(Deserialize)]
struct ScheduleToolRequest {
    patient: String,
    preferred_slot_iso: String,
    location: String,
}

async fn handle_schedule_tool(
    State(state): State<AppState>,
    Json(req): Json<ScheduleToolRequest>,
) -> Result<Json<Appointment>, AppError> {
    if req.patient.trim().is_empty() {
        return Err(bad_request("patient must not be empty"));
    }
    let slot_iso = normalize_slot_iso(&req.preferred_slot_iso)?;

    let appt = schedule::create(state.kv.as_ref(), &req.patient, &slot_iso, &req.location)
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    Ok(Json(appt))
}

// ============ POST /tools/reschedule_appointment ============

#[derive(Deserialize)]
struct RescheduleToolRequest {
    appt_id: String,
    new_slot_iso: String,
}

async fn handle_reschedule_tool(
    State(state): State<AppState>,
    Json(req): Json<RescheduleToolRequest>,
) -> Result<Json<Appointment>, AppError> {
    if req.appt_id.trim().is_empty() {
        return Err(bad_request("appt_id must not be empty"));
    }
    let slot_iso = normalize_slot_iso(&req.new_slot_iso)?;

    let appt = schedule::reschedule(state.kv.as_ref(), &req.appt_id, &slot_iso)
        .await
        .map_err(|e| match e {
            crate::error::ScheduleError::NotFound(id) => not_found(format!("unknown appointment: {id}")),
            other => internal_error(other.to_string()),
        })?;

    Ok(Json(appt))
}

// ============ GET /appointments, GET /appointments/{id} ============

async fn handle_list_appointments(
    State(state): State<AppState>,
) -> Result<Json<Vec<Appointment>>, AppError> {
    let appts = schedule::list(state.kv.as_ref())
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    Ok(Json(appts))
}

async fn handle_get_appointment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Appointment>, AppError> {
    let appt = schedule::get(state.kv.as_ref(), &id)
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    match appt {
        Some(appt) => Ok(Json(appt)),
        None => Err(not_found(format!("unknown appointment: {id}"))),
    }
}

// ============ DELETE /appointments/{id}, DELETE /appointments ============

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    deleted: Option<usize>,
}

async fn handle_cancel_appointment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, AppError> {
    schedule::cancel(state.kv.as_ref(), &id).await.map_err(|e| match e {
        crate::error::ScheduleError::NotFound(id) => not_found(format!("unknown appointment: {id}")),
        other => internal_error(other.to_string()),
    })?;
    Ok(Json(OkResponse {
        ok: true,
        deleted: None,
    }))
}

async fn handle_cancel_all_appointments(
    State(state): State<AppState>,
) -> Result<Json<OkResponse>, AppError> {
    let ids = state
        .kv
        .smembers(kv::APPTS_ALL_KEY)
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    let count = ids.len();
    for id in &ids {
        let _ = state.kv.del(&kv::appt_key(id)).await;
        let _ = state.kv.srem(kv::APPTS_ALL_KEY, id).await;
    }
    Ok(Json(OkResponse {
        ok: true,
        deleted: Some(count),
    }))
}

// ============ DELETE /cache/clear ============

async fn handle_cache_clear(State(state): State<AppState>) -> Result<Json<OkResponse>, AppError> {
    for prefix in ["emb:", "query:", "knowledge:"] {
        if let Err(err) = state.kv.clear_prefix(prefix).await {
            tracing::warn!(prefix, error = %err, "failed to clear cache prefix");
        }
    }
    Ok(Json(OkResponse {
        ok: true,
        deleted: None,
    }))
}

// ============ DELETE /knowledge/reset ============

async fn handle_knowledge_reset(State(state): State<AppState>) -> Result<Json<OkResponse>, AppError> {
    state
        .knowledge
        .reset()
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    Ok(Json(OkResponse {
        ok: true,
        deleted: None,
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    if let Err(err) = state.kv.get("__health__").await {
        return Err(service_unavailable(format!("kv store unreachable: {err}")));
    }
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

// ============ GET /stats ============

#[derive(Serialize)]
struct StatsResponse {
    document_count: usize,
    chunk_count: usize,
    session_count: usize,
    port: u16,
}

async fn handle_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        document_count: state.stats.document_count.load(Ordering::Relaxed),
        chunk_count: state.stats.chunk_count.load(Ordering::Relaxed),
        session_count: state.stats.sessions_seen.read().unwrap().len(),
        port: state.config.port,
    })
}

// ============ GET /debug/sessions ============

#[derive(Serialize)]
struct DebugSessionsResponse {
    sessions: Vec<String>,
}

async fn handle_debug_sessions(State(state): State<AppState>) -> Json<DebugSessionsResponse> {
    let mut sessions: Vec<String> = state.stats.sessions_seen.read().unwrap().iter().cloned().collect();
    sessions.sort();
    Json(DebugSessionsResponse { sessions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::embedding::{EmbeddingProvider, InMemoryHashProvider};
    use crate::intent::KeywordIntentModel;
    use crate::kv::InMemoryKvStore;
    use crate::vector_index::InMemoryVectorIndex;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let embedding: Arc<dyn EmbeddingProvider> = Arc::new(InMemoryHashProvider::new());
        let retrieval = RetrievalConfig::default();
        let knowledge = Arc::new(KnowledgeDao::new(
            embedding.clone(),
            Arc::new(InMemoryVectorIndex::new()),
            kv.clone(),
            retrieval.clone(),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            knowledge.clone(),
            embedding,
            kv.clone(),
            Arc::new(KeywordIntentModel),
            retrieval,
        ));
        build_router(orchestrator, knowledge, kv, Arc::new(Config::default()))
    }

    #[tokio::test]
    async fn chat_rejects_empty_message() {
        let app = test_router();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"message":""}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_mints_session_id_when_absent() {
        let app = test_router();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"message":"hello"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ChatResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(!body.session_id.is_empty());
    }

    #[tokio::test]
    async fn get_unknown_appointment_is_404() {
        let app = test_router();
        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/appointments/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = test_router();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ingest_rejects_empty_document_list() {
        let app = test_router();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/knowledge")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"documents":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
