//! Core data models used throughout the orchestrator.
//!
//! These types represent the documents, chunks, sessions, and appointments
//! that flow through the ingestion, retrieval, and dispatch pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Ingest input: a document to be chunked, embedded, and indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub tags: HashSet<String>,
}

/// A bounded slice of a [`Document`], the unit of retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Opaque unique identifier used as the vector index point id.
    pub point_id: String,
    pub doc_id: String,
    /// 0-based, dense within one document's chunks.
    pub chunk_index: i64,
    pub text: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub tags: HashSet<String>,
}

/// A citation returned alongside a composed reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub doc_id: String,
    pub chunk_index: i64,
    /// Rounded to 2 decimal places.
    pub score: f64,
    /// 1-based position in the returned list.
    pub r#ref: usize,
}

/// Two independent intent labels; both may be true (dual intent) or both
/// false (unclear — triggers a clarification reply).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntentVector {
    pub schedule: bool,
    pub knowledge: bool,
}

impl IntentVector {
    pub fn is_unclear(&self) -> bool {
        !self.schedule && !self.knowledge
    }

    pub fn is_dual(&self) -> bool {
        self.schedule && self.knowledge
    }
}

/// A single label/confidence pair produced by an [`crate::intent::IntentModel`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentPrediction {
    pub label: String,
    pub confidence: f32,
}

/// The last appointment a session touched, kept as a weak reference
/// (identifier, not ownership) into the appointment store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastAppointment {
    pub patient: String,
    pub slot_iso: String,
    pub location: String,
    pub appt_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-`session_id` context, currently only the last-appointment reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    pub last_appt: Option<LastAppointment>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Scheduled,
    Cancelled,
}

/// A scheduled appointment managed by the Schedule Interface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub appt_id: String,
    pub patient: String,
    pub normalized_slot_iso: String,
    pub location: String,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// One entry in a turn's `tool_calls[]` envelope member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
    pub result: serde_json::Value,
}

/// One entry in a turn's `plan_steps[]` trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub step: String,
    #[serde(default)]
    pub detail: serde_json::Value,
    pub latency_ms: u64,
}

impl PlanStep {
    pub fn new(step: &str, detail: serde_json::Value, latency_ms: u64) -> Self {
        Self {
            step: step.to_string(),
            detail,
            latency_ms,
        }
    }
}

/// The full response envelope returned to a `/chat` caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub reply: String,
    pub citations: Vec<Citation>,
    pub plan_steps: Vec<PlanStep>,
    pub tool_calls: Vec<ToolCall>,
    pub latency_ms: u64,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_vector_classification() {
        let unclear = IntentVector::default();
        assert!(unclear.is_unclear());
        assert!(!unclear.is_dual());

        let dual = IntentVector {
            schedule: true,
            knowledge: true,
        };
        assert!(dual.is_dual());
        assert!(!dual.is_unclear());
    }

    #[test]
    fn citation_round_trips_through_json() {
        let c = Citation {
            doc_id: "pol-1".to_string(),
            chunk_index: 0,
            score: 0.83,
            r#ref: 1,
        };
        let json = serde_json::to_string(&c).unwrap();
        let back: Citation = serde_json::from_str(&json).unwrap();
        assert_eq!(c, back);
    }
}
