//! Per-boundary error types.
//!
//! Each component returns a tagged result rather than letting exceptions
//! cross a boundary. `anyhow::Error` is used for internal plumbing
//! that never needs to be matched on; `thiserror`-derived enums are used
//! where a caller (tests, the orchestrator, the HTTP layer) needs to
//! branch on the failure kind.

use thiserror::Error;

/// Errors from the appointment store proxy ([`crate::schedule`]).
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("appointment not found: {0}")]
    NotFound(String),
    #[error("backing store error: {0}")]
    Backing(#[from] anyhow::Error),
}

/// Errors from entity extraction ([`crate::entities`]).
#[derive(Debug, Error)]
pub enum EntityError {
    #[error("could not resolve a time expression")]
    NoTimeFound,
    #[error("could not resolve a name")]
    NoNameFound,
}

/// Errors surfaced by the orchestrator when a turn cannot be completed at
/// all. Carries whatever plan steps were accumulated before the
/// failure so the caller can still render partial progress.
#[derive(Debug, Error)]
#[error("turn failed: {message}")]
pub struct OrchestratorError {
    pub message: String,
    pub plan_steps: Vec<crate::models::PlanStep>,
}

impl OrchestratorError {
    pub fn new(message: impl Into<String>, plan_steps: Vec<crate::models::PlanStep>) -> Self {
        Self {
            message: message.into(),
            plan_steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_error_display() {
        let err = ScheduleError::NotFound("appt-1".to_string());
        assert_eq!(err.to_string(), "appointment not found: appt-1");
    }

    #[test]
    fn schedule_error_from_anyhow() {
        let inner = anyhow::anyhow!("kv store unreachable");
        let err: ScheduleError = inner.into();
        assert!(matches!(err, ScheduleError::Backing(_)));
        assert!(err.to_string().contains("kv store unreachable"));
    }

    #[test]
    fn orchestrator_error_carries_plan_steps() {
        let steps = vec![crate::models::PlanStep::new(
            "intent_detection",
            serde_json::json!({}),
            2,
        )];
        let err = OrchestratorError::new("boom", steps.clone());
        assert_eq!(err.plan_steps.len(), 1);
        assert_eq!(err.plan_steps[0].step, "intent_detection");
    }
}
