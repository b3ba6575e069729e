use ulid::Ulid;

use crate::config::EngineConfig;
use crate::limits::*;
use crate::model::*;

use super::store::AppointmentStore;
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// `now <= at <= now + max_lookahead`.
pub(crate) fn check_horizon(at: Ms, now: Ms, config: &EngineConfig) -> Result<(), EngineError> {
    let latest = now.saturating_add(config.max_lookahead_ms);
    if at < now || at > latest {
        return Err(EngineError::OutOfHorizon {
            requested: at,
            earliest: now,
            latest,
        });
    }
    Ok(())
}

/// Fails with the holder's id when `key` is occupied by anyone but `exclude`.
pub(crate) fn check_slot_free(
    store: &AppointmentStore,
    key: &SlotKey,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match store.slot_holder(key) {
        Some(holder) if Some(holder) != exclude => Err(EngineError::Conflict(holder)),
        _ => Ok(()),
    }
}

/// Store-wide exhaustion is a server-side failure; a patient over their
/// own quota is rejected as bad input.
pub(crate) fn check_capacity(stored: usize, for_patient: usize) -> Result<(), EngineError> {
    if stored >= MAX_APPOINTMENTS {
        return Err(EngineError::Infrastructure("appointment store is full".into()));
    }
    if for_patient >= MAX_APPOINTMENTS_PER_PATIENT {
        return Err(EngineError::Validation("too many appointments for patient".into()));
    }
    Ok(())
}

fn require_id(field: &str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("{field} is required")));
    }
    if value.len() > MAX_ID_LEN {
        return Err(EngineError::Validation(format!("{field} too long")));
    }
    Ok(())
}

fn limit_text(field: &str, value: Option<&str>, max: usize) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > max => Err(EngineError::Validation(format!("{field} too long"))),
        _ => Ok(()),
    }
}

pub(crate) fn validate_new(req: &NewAppointment) -> Result<(), EngineError> {
    require_id("patient_id", &req.patient_id)?;
    require_id("doctor_id", &req.doctor_id)?;
    limit_text("reason", req.reason.as_deref(), MAX_REASON_LEN)?;
    limit_text("note", req.note.as_deref(), MAX_NOTE_LEN)?;
    Ok(())
}

/// Returns the trimmed reason.
pub(crate) fn validate_cancellation_reason(reason: &str) -> Result<String, EngineError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation("cancellation reason is required".into()));
    }
    limit_text("cancellation reason", Some(trimmed), MAX_CANCELLATION_REASON_LEN)?;
    Ok(trimmed.to_string())
}

/// Blank optional text is stored as absent.
pub(crate) fn normalize_text(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let t = v.trim();
        if t.is_empty() { None } else { Some(t.to_string()) }
    })
}
