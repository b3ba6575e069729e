use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Scheduled,
    Cancelled,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Scheduled => "scheduled",
            Status::Cancelled => "cancelled",
        }
    }

    /// Anything but `Cancelled` holds its slot.
    pub fn is_active(&self) -> bool {
        !matches!(self, Status::Cancelled)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Status::Pending),
            "scheduled" => Ok(Status::Scheduled),
            "cancelled" | "canceled" => Ok(Status::Cancelled),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// The fixed specialty set a doctor can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DoctorType {
    #[serde(rename = "Cardiologist")]
    Cardiologist,
    #[serde(rename = "Family Medicine")]
    FamilyMedicine,
    #[serde(rename = "Internal Medicine")]
    InternalMedicine,
}

impl DoctorType {
    pub const ALL: [DoctorType; 3] = [
        DoctorType::Cardiologist,
        DoctorType::FamilyMedicine,
        DoctorType::InternalMedicine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DoctorType::Cardiologist => "Cardiologist",
            DoctorType::FamilyMedicine => "Family Medicine",
            DoctorType::InternalMedicine => "Internal Medicine",
        }
    }
}

impl fmt::Display for DoctorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DoctorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        DoctorType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown doctor type: {wanted}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub doctor_type: DoctorType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub patient_id: String,
    pub doctor_id: String,
    pub doctor_type: DoctorType,
    pub scheduled_at: Ms,
    pub status: Status,
    pub reason: Option<String>,
    pub note: Option<String>,
    /// Set exactly when `status == Cancelled`.
    pub cancellation_reason: Option<String>,
    pub created_at: Ms,
}

impl Appointment {
    pub fn slot_key(&self, slot_width: Ms) -> SlotKey {
        SlotKey::new(&self.doctor_id, self.scheduled_at, slot_width)
    }
}

/// Input for a new appointment request. The engine assigns id, status and
/// creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAppointment {
    pub patient_id: String,
    pub doctor_id: String,
    pub doctor_type: DoctorType,
    pub scheduled_at: Ms,
    pub reason: Option<String>,
    pub note: Option<String>,
}

/// Identifies one doctor's slot bucket: `scheduled_at` floored to the slot width.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub doctor_id: String,
    pub bucket: i64,
}

impl SlotKey {
    pub fn new(doctor_id: &str, at: Ms, slot_width: Ms) -> Self {
        Self {
            doctor_id: doctor_id.to_string(),
            bucket: at.div_euclid(slot_width),
        }
    }

    pub fn span(&self, slot_width: Ms) -> Span {
        let start = self.bucket * slot_width;
        Span::new(start, start.saturating_add(slot_width))
    }
}

/// Lifecycle actions, used for transition errors and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Confirm,
    Cancel,
    Reschedule,
    ChangeDoctor,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Confirm => "confirm",
            Action::Cancel => "cancel",
            Action::Reschedule => "reschedule",
            Action::ChangeDoctor => "change doctor of",
        };
        f.write_str(s)
    }
}

/// Flat event types; this is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// Also used by compaction to restore a record in its current state.
    AppointmentCreated {
        appointment: Appointment,
    },
    AppointmentConfirmed {
        id: Ulid,
    },
    AppointmentCancelled {
        id: Ulid,
        reason: String,
    },
    AppointmentRescheduled {
        id: Ulid,
        doctor_id: String,
        doctor_type: DoctorType,
        scheduled_at: Ms,
    },
}

impl Event {
    pub fn appointment_id(&self) -> Ulid {
        match self {
            Event::AppointmentCreated { appointment } => appointment.id,
            Event::AppointmentConfirmed { id }
            | Event::AppointmentCancelled { id, .. }
            | Event::AppointmentRescheduled { id, .. } => *id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Conflict(Ulid),
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

/// Read-only bundle handed to the document-export collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportBundle {
    pub appointment: Appointment,
    pub doctor: Doctor,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub scheduled: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.scheduled + self.cancelled
    }
}
