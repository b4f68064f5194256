//! Schedule Interface: CRUD over appointments, KV-backed.
//!
//! A thin typed proxy over `appt:{id}` entries plus an `appts:all` set
//! index, the same "wrap one KV namespace in a typed API" shape as
//! [`crate::session`]. Grounded on `ScheduleError` (already `thiserror`-
//! derived in [`crate::error`]) for the not-found path, modeled on
//! `peter-hollis-orkastrate-engram/crates/engram-action/src/error.rs`'s
//! `TaskError::NotFound`.

use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use uuid::Uuid;

use crate::error::ScheduleError;
use crate::kv::{self, KvStore};
use crate::models::{Appointment, AppointmentStatus};

const APPOINTMENT_TTL_SECS: u64 = 604_800;

async fn load(kv: &dyn KvStore, appt_id: &str) -> Result<Option<Appointment>, ScheduleError> {
    let key = kv::appt_key(appt_id);
    let bytes = kv.get(&key).await.map_err(ScheduleError::Backing)?;
    match bytes {
        Some(bytes) => {
            let appt: Appointment = serde_json::from_slice(&bytes)
                .context("decoding stored appointment")
                .map_err(ScheduleError::Backing)?;
            Ok(Some(appt))
        }
        None => Ok(None),
    }
}

async fn save(kv: &dyn KvStore, appt: &Appointment) -> Result<(), ScheduleError> {
    let key = kv::appt_key(&appt.appt_id);
    let bytes = serde_json::to_vec(appt)
        .context("encoding appointment")
        .map_err(ScheduleError::Backing)?;
    kv.set(&key, bytes, Some(Duration::from_secs(APPOINTMENT_TTL_SECS)))
        .await
        .map_err(ScheduleError::Backing)?;
    kv.sadd(kv::APPTS_ALL_KEY, &appt.appt_id)
        .await
        .map_err(ScheduleError::Backing)?;
    Ok(())
}

/// Book a new appointment.
pub async fn create(
    kv: &dyn KvStore,
    patient: &str,
    normalized_slot_iso: &str,
    location: &str,
) -> Result<Appointment, ScheduleError> {
    let appt = Appointment {
        appt_id: Uuid::new_v4().to_string(),
        patient: patient.to_string(),
        normalized_slot_iso: normalized_slot_iso.to_string(),
        location: location.to_string(),
        status: AppointmentStatus::Scheduled,
        created_at: Utc::now(),
        updated_at: None,
    };
    save(kv, &appt).await?;
    Ok(appt)
}

/// Move an existing appointment to a new slot, keeping its `appt_id`.
pub async fn reschedule(
    kv: &dyn KvStore,
    appt_id: &str,
    new_slot_iso: &str,
) -> Result<Appointment, ScheduleError> {
    let mut appt = load(kv, appt_id)
        .await?
        .ok_or_else(|| ScheduleError::NotFound(appt_id.to_string()))?;
    appt.normalized_slot_iso = new_slot_iso.to_string();
    appt.updated_at = Some(Utc::now());
    save(kv, &appt).await?;
    Ok(appt)
}

pub async fn get(kv: &dyn KvStore, appt_id: &str) -> Result<Option<Appointment>, ScheduleError> {
    load(kv, appt_id).await
}

pub async fn list(kv: &dyn KvStore) -> Result<Vec<Appointment>, ScheduleError> {
    let ids = kv.smembers(kv::APPTS_ALL_KEY).await.map_err(ScheduleError::Backing)?;
    let mut appts = Vec::new();
    for id in ids {
        if let Some(appt) = load(kv, &id).await? {
            appts.push(appt);
        }
    }
    appts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(appts)
}

pub async fn cancel(kv: &dyn KvStore, appt_id: &str) -> Result<Appointment, ScheduleError> {
    let mut appt = load(kv, appt_id)
        .await?
        .ok_or_else(|| ScheduleError::NotFound(appt_id.to_string()))?;
    appt.status = AppointmentStatus::Cancelled;
    appt.updated_at = Some(Utc::now());
    save(kv, &appt).await?;
    Ok(appt)
}
