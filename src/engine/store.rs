use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::warn;
use ulid::Ulid;

use crate::model::*;

pub type SharedAppointment = Arc<RwLock<Appointment>>;

/// In-memory appointment records plus the two indexes the engine needs:
/// which appointment holds each active slot, and which appointments belong
/// to each patient.
///
/// Mutated only by the lifecycle operations, after their event is durable.
pub struct AppointmentStore {
    appointments: DashMap<Ulid, SharedAppointment>,
    active_slots: DashMap<SlotKey, Ulid>,
    by_patient: DashMap<String, Vec<Ulid>>,
    slot_width: Ms,
}

impl AppointmentStore {
    pub fn new(slot_width: Ms) -> Self {
        Self {
            appointments: DashMap::new(),
            active_slots: DashMap::new(),
            by_patient: DashMap::new(),
            slot_width,
        }
    }

    pub fn slot_width(&self) -> Ms {
        self.slot_width
    }

    // ── Records ──────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.appointments.len()
    }

    pub fn get(&self, id: &Ulid) -> Option<SharedAppointment> {
        self.appointments.get(id).map(|e| e.value().clone())
    }

    pub fn all(&self) -> Vec<SharedAppointment> {
        self.appointments.iter().map(|e| e.value().clone()).collect()
    }

    pub fn ids_for_patient(&self, patient_id: &str) -> Vec<Ulid> {
        self.by_patient
            .get(patient_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn patient_count(&self, patient_id: &str) -> usize {
        self.by_patient.get(patient_id).map_or(0, |e| e.len())
    }

    // ── Slot index ───────────────────────────────────────────

    /// The active appointment holding `key`, if any.
    pub fn slot_holder(&self, key: &SlotKey) -> Option<Ulid> {
        self.active_slots.get(key).map(|e| *e.value())
    }

    pub fn active_slot_count(&self) -> usize {
        self.active_slots.len()
    }

    fn claim_slot(&self, key: SlotKey, id: Ulid) {
        if let Some(previous) = self.active_slots.insert(key.clone(), id)
            && previous != id
        {
            // Only reachable on replay after the slot width changed.
            warn!(
                "slot {}@{} now held by {id}, displacing {previous}",
                key.doctor_id, key.bucket
            );
        }
    }

    fn release_slot(&self, key: &SlotKey, id: Ulid) {
        self.active_slots.remove_if(key, |_, holder| *holder == id);
    }

    // ── Event application ────────────────────────────────────

    /// Insert a record as carried by `AppointmentCreated`.
    pub fn insert(&self, appointment: Appointment) -> SharedAppointment {
        let id = appointment.id;
        if appointment.status.is_active() {
            self.claim_slot(appointment.slot_key(self.slot_width), id);
        }
        self.by_patient
            .entry(appointment.patient_id.clone())
            .or_default()
            .push(id);
        let shared = Arc::new(RwLock::new(appointment));
        self.appointments.insert(id, shared.clone());
        shared
    }

    /// Apply a non-create event to a record the caller has locked for writing.
    pub fn apply_event(&self, appt: &mut Appointment, event: &Event) {
        match event {
            Event::AppointmentCreated { .. } => {}
            Event::AppointmentConfirmed { .. } => {
                appt.status = Status::Scheduled;
            }
            Event::AppointmentCancelled { reason, .. } => {
                self.release_slot(&appt.slot_key(self.slot_width), appt.id);
                appt.status = Status::Cancelled;
                appt.cancellation_reason = Some(reason.clone());
            }
            Event::AppointmentRescheduled {
                doctor_id,
                doctor_type,
                scheduled_at,
                ..
            } => {
                let old_key = appt.slot_key(self.slot_width);
                appt.doctor_id = doctor_id.clone();
                appt.doctor_type = *doctor_type;
                appt.scheduled_at = *scheduled_at;
                if appt.status.is_active() {
                    let new_key = appt.slot_key(self.slot_width);
                    if new_key != old_key {
                        self.release_slot(&old_key, appt.id);
                        self.claim_slot(new_key, appt.id);
                    }
                }
            }
        }
    }

    /// Replay one logged event. The caller is the sole owner of the store,
    /// so record locks are uncontended.
    pub fn replay_event(&self, event: &Event) {
        match event {
            Event::AppointmentCreated { appointment } => {
                self.insert(appointment.clone());
            }
            other => {
                let id = other.appointment_id();
                let Some(shared) = self.get(&id) else {
                    warn!("replay: event for unknown appointment {id}, skipping");
                    return;
                };
                match shared.try_write() {
                    Ok(mut guard) => self.apply_event(&mut guard, other),
                    Err(_) => warn!("replay: appointment {id} unexpectedly locked, skipping"),
                };
            }
        }
    }
}
