use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let shared = self
            .store
            .get(&id)
            .ok_or(EngineError::AppointmentNotFound(id))?;
        let appt = shared.read().await;
        Ok(appt.clone())
    }

    /// Every appointment the patient ever requested, cancelled ones included,
    /// latest `scheduled_at` first.
    pub async fn list_appointments_for_patient(&self, patient_id: &str) -> Vec<Appointment> {
        let mut result = Vec::new();
        for id in self.store.ids_for_patient(patient_id) {
            if let Some(shared) = self.store.get(&id) {
                result.push(shared.read().await.clone());
            }
        }
        result.sort_by(|a, b| {
            b.scheduled_at
                .cmp(&a.scheduled_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        result
    }

    pub fn list_doctors(&self, doctor_type: Option<DoctorType>) -> Vec<Doctor> {
        self.roster.list(doctor_type)
    }

    /// Read-only snapshot for document export.
    pub async fn export_bundle(&self, id: Ulid) -> Result<ExportBundle, EngineError> {
        let appointment = self.get_appointment(id).await?;
        let doctor = self
            .roster
            .get(&appointment.doctor_id)
            .cloned()
            .ok_or_else(|| EngineError::DoctorNotFound(appointment.doctor_id.clone()))?;
        Ok(ExportBundle { appointment, doctor })
    }

    /// Newest requests first, for the admin dashboard.
    pub async fn recent_appointments(&self, limit: usize) -> Vec<Appointment> {
        let mut all = Vec::with_capacity(self.store.len());
        for shared in self.store.all() {
            all.push(shared.read().await.clone());
        }
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        all.truncate(limit);
        all
    }

    pub async fn appointment_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for shared in self.store.all() {
            match shared.read().await.status {
                Status::Pending => counts.pending += 1,
                Status::Scheduled => counts.scheduled += 1,
                Status::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    pub fn appointment_count(&self) -> usize {
        self.store.len()
    }

    pub fn active_slot_count(&self) -> usize {
        self.store.active_slot_count()
    }
}
