use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;
use crate::observability::RESERVATIONS_TOTAL;

use super::conflict::{
    check_capacity, check_horizon, check_slot_free, normalize_text, now_ms,
    validate_cancellation_reason, validate_new,
};
use super::{Engine, EngineError};

fn reservation_outcome<T>(result: &Result<T, EngineError>) -> &'static str {
    match result {
        Ok(_) => "reserved",
        Err(EngineError::Conflict(_)) => "conflict",
        Err(EngineError::OutOfHorizon { .. }) => "out_of_horizon",
        Err(EngineError::Infrastructure(_)) => "error",
        Err(_) => "rejected",
    }
}

fn record_reservation<T>(op: &'static str, result: &Result<T, EngineError>) {
    metrics::counter!(RESERVATIONS_TOTAL, "op" => op, "outcome" => reservation_outcome(result))
        .increment(1);
}

impl Engine {
    /// Atomic reserve of `(doctor, bucket)` plus insertion of a `pending`
    /// appointment. Exactly one of several racing creates for the same key
    /// succeeds; the rest see `Conflict` and change nothing.
    pub async fn create_appointment(&self, req: NewAppointment) -> Result<Appointment, EngineError> {
        let result = self.reserve_new(req).await;
        record_reservation("create", &result);
        match &result {
            Ok(appt) => info!(
                "created appointment {} for {} with {} at {}",
                appt.id, appt.patient_id, appt.doctor_id, appt.scheduled_at
            ),
            Err(e) => debug!("create rejected: {e}"),
        }
        result
    }

    async fn reserve_new(&self, req: NewAppointment) -> Result<Appointment, EngineError> {
        let _gate = self.compaction_gate.read().await;
        validate_new(&req)?;
        let doctor = self
            .roster
            .get(&req.doctor_id)
            .ok_or_else(|| EngineError::DoctorNotFound(req.doctor_id.clone()))?;
        if doctor.doctor_type != req.doctor_type {
            return Err(EngineError::Validation(format!(
                "doctor {} is {}, not {}",
                doctor.id, doctor.doctor_type, req.doctor_type
            )));
        }
        let now = now_ms();
        check_horizon(req.scheduled_at, now, &self.config)?;
        check_capacity(self.store.len(), self.store.patient_count(&req.patient_id))?;

        let key = SlotKey::new(&req.doctor_id, req.scheduled_at, self.store.slot_width());
        let _slot = self.slot_locks.acquire(&key, self.config.store_timeout).await?;
        check_slot_free(&self.store, &key, None)?;

        let appointment = Appointment {
            id: Ulid::new(),
            patient_id: req.patient_id,
            doctor_id: req.doctor_id,
            doctor_type: req.doctor_type,
            scheduled_at: req.scheduled_at,
            status: Status::Pending,
            reason: normalize_text(req.reason),
            note: normalize_text(req.note),
            cancellation_reason: None,
            created_at: now,
        };
        let event = Event::AppointmentCreated {
            appointment: appointment.clone(),
        };
        self.wal_append(&event).await?;
        self.store.insert(appointment.clone());
        Ok(appointment)
    }

    pub async fn confirm_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let shared = self
            .store
            .get(&id)
            .ok_or(EngineError::AppointmentNotFound(id))?;
        let mut appt = shared.write().await;
        if appt.status != Status::Pending {
            debug!("confirm rejected for {id}: status {}", appt.status);
            return Err(EngineError::InvalidTransition {
                id,
                from: appt.status,
                action: Action::Confirm,
            });
        }
        self.persist_and_apply(&mut appt, &Event::AppointmentConfirmed { id })
            .await?;
        info!("confirmed appointment {id}");
        Ok(appt.clone())
    }

    /// Cancel and release the slot. The release is in the slot index before
    /// this returns, so a later availability check sees the slot free.
    pub async fn cancel_appointment(&self, id: Ulid, reason: &str) -> Result<Appointment, EngineError> {
        let reason = validate_cancellation_reason(reason)?;
        let _gate = self.compaction_gate.read().await;
        let shared = self
            .store
            .get(&id)
            .ok_or(EngineError::AppointmentNotFound(id))?;
        let mut appt = shared.write().await;
        if !appt.status.is_active() {
            debug!("cancel rejected for {id}: already {}", appt.status);
            return Err(EngineError::InvalidTransition {
                id,
                from: appt.status,
                action: Action::Cancel,
            });
        }

        let key = appt.slot_key(self.store.slot_width());
        let _slot = self.slot_locks.acquire(&key, self.config.store_timeout).await?;
        self.persist_and_apply(&mut appt, &Event::AppointmentCancelled { id, reason })
            .await?;
        info!("cancelled appointment {id}");
        Ok(appt.clone())
    }

    /// Move an active appointment to `new_at`, optionally with another doctor.
    /// A doctor change is only allowed while the appointment is still pending.
    pub async fn reschedule_appointment(
        &self,
        id: Ulid,
        new_at: Ms,
        new_doctor_id: Option<String>,
    ) -> Result<Appointment, EngineError> {
        let result = self.reserve_moved(id, new_at, new_doctor_id).await;
        record_reservation("reschedule", &result);
        match &result {
            Ok(appt) => info!(
                "rescheduled appointment {id} to {} at {}",
                appt.doctor_id, appt.scheduled_at
            ),
            Err(e) => debug!("reschedule rejected for {id}: {e}"),
        }
        result
    }

    async fn reserve_moved(
        &self,
        id: Ulid,
        new_at: Ms,
        new_doctor_id: Option<String>,
    ) -> Result<Appointment, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let shared = self
            .store
            .get(&id)
            .ok_or(EngineError::AppointmentNotFound(id))?;
        let mut appt = shared.write().await;
        if !appt.status.is_active() {
            return Err(EngineError::InvalidTransition {
                id,
                from: appt.status,
                action: Action::Reschedule,
            });
        }

        let (doctor_id, doctor_type) = match new_doctor_id {
            Some(doctor_id) if doctor_id != appt.doctor_id => {
                if appt.status != Status::Pending {
                    return Err(EngineError::InvalidTransition {
                        id,
                        from: appt.status,
                        action: Action::ChangeDoctor,
                    });
                }
                let doctor = self
                    .roster
                    .get(&doctor_id)
                    .ok_or(EngineError::DoctorNotFound(doctor_id))?;
                (doctor.id.clone(), doctor.doctor_type)
            }
            _ => (appt.doctor_id.clone(), appt.doctor_type),
        };
        check_horizon(new_at, now_ms(), &self.config)?;

        let width = self.store.slot_width();
        let old_key = appt.slot_key(width);
        let new_key = SlotKey::new(&doctor_id, new_at, width);
        let _slots = self
            .slot_locks
            .acquire_all(&[old_key, new_key.clone()], self.config.store_timeout)
            .await?;
        check_slot_free(&self.store, &new_key, Some(id))?;

        let event = Event::AppointmentRescheduled {
            id,
            doctor_id,
            doctor_type,
            scheduled_at: new_at,
        };
        self.persist_and_apply(&mut appt, &event).await?;
        Ok(appt.clone())
    }
}
