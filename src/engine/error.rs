use ulid::Ulid;

use crate::model::{Action, Ms, Status};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A required field is missing or malformed.
    Validation(String),
    OutOfHorizon {
        requested: Ms,
        earliest: Ms,
        latest: Ms,
    },
    /// The slot is held by another active appointment.
    Conflict(Ulid),
    InvalidTransition {
        id: Ulid,
        from: Status,
        action: Action,
    },
    AppointmentNotFound(Ulid),
    DoctorNotFound(String),
    /// The store could not commit or answer in time. Never retried internally.
    Infrastructure(String),
}

/// Coarse error class, for callers that map errors onto another protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    OutOfHorizon,
    Conflict,
    InvalidTransition,
    NotFound,
    Infrastructure,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::OutOfHorizon { .. } => ErrorKind::OutOfHorizon,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            EngineError::AppointmentNotFound(_) | EngineError::DoctorNotFound(_) => {
                ErrorKind::NotFound
            }
            EngineError::Infrastructure(_) => ErrorKind::Infrastructure,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::OutOfHorizon {
                requested,
                earliest,
                latest,
            } => write!(
                f,
                "requested time {requested} is outside the booking horizon [{earliest}, {latest}]"
            ),
            EngineError::Conflict(id) => write!(f, "slot already held by appointment: {id}"),
            EngineError::InvalidTransition { id, from, action } => {
                write!(f, "cannot {action} appointment {id}: status is {from}")
            }
            EngineError::AppointmentNotFound(id) => write!(f, "appointment not found: {id}"),
            EngineError::DoctorNotFound(id) => write!(f, "doctor not found: {id}"),
            EngineError::Infrastructure(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
