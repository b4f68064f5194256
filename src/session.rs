//! Session Memory: per-session "what appointment did we just talk about"
//! context, used to resolve reschedule-by-context turns.
//!
//! A thin typed proxy over one [`crate::kv::KvStore`] namespace, the same
//! shape the teacher uses for its single-purpose KV wrappers: read, modify,
//! write back with the TTL refreshed on every write. Sessions are assumed
//! single-user, so last-writer-wins on concurrent writes is acceptable
//! (no optimistic-lock retry loop here, unlike the teacher's cache layer).

use std::time::Duration;

use anyhow::{Context, Result};

use crate::kv::{self, KvStore};
use crate::models::SessionContext;

const SESSION_TTL_SECS: u64 = 1800;

/// Load the session context for `session_id`, or a default (empty) one if
/// absent or malformed.
pub async fn load(kv: &dyn KvStore, session_id: &str) -> Result<SessionContext> {
    let key = kv::memory_key(session_id);
    match kv.get(&key).await.context("reading session memory")? {
        Some(bytes) => {
            let context: SessionContext =
                serde_json::from_slice(&bytes).unwrap_or_default();
            Ok(context)
        }
        None => Ok(SessionContext::default()),
    }
}

/// Persist `context` for `session_id`, refreshing the TTL.
pub async fn store(kv: &dyn KvStore, session_id: &str, context: &SessionContext) -> Result<()> {
    let key = kv::memory_key(session_id);
    let bytes = serde_json::to_vec(context).context("serializing session memory")?;
    kv.set(&key, bytes, Some(Duration::from_secs(SESSION_TTL_SECS)))
        .await
        .context("writing session memory")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKvStore;
    use crate::models::LastAppointment;
    use chrono::Utc;

    #[tokio::test]
    async fn load_returns_default_when_absent() {
        let kv = InMemoryKvStore::new();
        let ctx = load(&kv, "sess-1").await.unwrap();
        assert!(ctx.last_appt.is_none());
    }

    fn last_appt(appt_id: &str, patient: &str) -> LastAppointment {
        LastAppointment {
            patient: patient.to_string(),
            slot_iso: Utc::now().to_rfc3339(),
            location: "Midtown".to_string(),
            appt_id: appt_id.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn store_then_load_round_trips() {
        let kv = InMemoryKvStore::new();
        let ctx = SessionContext {
            last_appt: Some(last_appt("appt-1", "Chen")),
        };
        store(&kv, "sess-1", &ctx).await.unwrap();

        let loaded = load(&kv, "sess-1").await.unwrap();
        assert_eq!(loaded.last_appt.unwrap().patient, "Chen");
    }

    #[tokio::test]
    async fn later_write_overwrites_earlier_one() {
        let kv = InMemoryKvStore::new();
        store(
            &kv,
            "sess-1",
            &SessionContext {
                last_appt: Some(last_appt("appt-1", "Chen")),
            },
        )
        .await
        .unwrap();
        store(
            &kv,
            "sess-1",
            &SessionContext {
                last_appt: Some(last_appt("appt-2", "Rivera")),
            },
        )
        .await
        .unwrap();

        let loaded = load(&kv, "sess-1").await.unwrap();
        assert_eq!(loaded.last_appt.unwrap().patient, "Rivera");
    }
}
