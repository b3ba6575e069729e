use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;
use ulid::Ulid;

use crate::sql::Command;

/// Login name that authenticates with the admin passkey.
pub const ADMIN_USER: &str = "admin";

#[derive(Debug, Clone)]
pub struct Credentials {
    pub password: String,
    pub admin_passkey: String,
}

/// Cleartext password source: `admin` gets the passkey, every other login
/// the shared patient password.
#[derive(Debug)]
pub struct ClinicAuthSource {
    credentials: Credentials,
}

impl ClinicAuthSource {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    fn password_for(&self, user: Option<&str>) -> &str {
        match user {
            Some(ADMIN_USER) => &self.credentials.admin_passkey,
            _ => &self.credentials.password,
        }
    }
}

#[async_trait]
impl AuthSource for ClinicAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let password = self.password_for(login.user());
        Ok(Password::new(None, password.as_bytes().to_vec()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Admin,
    /// A patient acting on their own behalf; the id is the login name.
    Patient(String),
}

impl Caller {
    pub fn from_user(user: &str) -> Self {
        if user == ADMIN_USER {
            Caller::Admin
        } else {
            Caller::Patient(user.to_string())
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Caller::Admin)
    }

    /// Admins own everything; patients own their own records.
    pub fn owns(&self, patient_id: &str) -> bool {
        match self {
            Caller::Admin => true,
            Caller::Patient(me) => me == patient_id,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Access {
    Granted,
    /// Allowed only if the caller owns this appointment.
    OwnerOf(Ulid),
    Denied(&'static str),
}

/// Decide whether `caller` may run `cmd`. The engine itself trusts
/// identities, so this gate runs before any command reaches it.
pub fn authorize(caller: &Caller, cmd: &Command) -> Access {
    if caller.is_admin() {
        return Access::Granted;
    }
    match cmd {
        Command::CreateAppointment(req) if caller.owns(&req.patient_id) => Access::Granted,
        Command::CreateAppointment(_) => Access::Denied("patients may only book for themselves"),
        Command::SelectPatientAppointments { patient_id } if caller.owns(patient_id) => {
            Access::Granted
        }
        Command::SelectPatientAppointments { .. } => {
            Access::Denied("patients may only list their own appointments")
        }
        Command::CancelAppointment { id, .. }
        | Command::SelectAppointment { id }
        | Command::SelectExport { id } => Access::OwnerOf(*id),
        Command::ConfirmAppointment { .. } => Access::Denied("confirm requires admin"),
        Command::RescheduleAppointment { .. } => Access::Denied("reschedule requires admin"),
        Command::SelectAllAppointments | Command::SelectCounts => {
            Access::Denied("requires admin")
        }
        Command::SelectAvailability { .. }
        | Command::SelectFreeSlots { .. }
        | Command::SelectDoctors { .. } => Access::Granted,
    }
}
