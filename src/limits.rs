use crate::model::Ms;

pub const MAX_ID_LEN: usize = 128;
pub const MAX_REASON_LEN: usize = 2_000;
pub const MAX_NOTE_LEN: usize = 2_000;
pub const MAX_CANCELLATION_REASON_LEN: usize = 1_000;

pub const MAX_APPOINTMENTS: usize = 1_000_000;
pub const MAX_APPOINTMENTS_PER_PATIENT: usize = 10_000;
pub const MAX_ROSTER_SIZE: usize = 10_000;

/// Widest window a `free_slots` query may cover (31 days).
pub const MAX_QUERY_WINDOW_MS: Ms = 31 * 24 * 3_600_000;

pub const MIN_SLOT_WIDTH_MS: Ms = 60_000;
pub const MAX_SLOT_WIDTH_MS: Ms = 24 * 3_600_000;

/// Rows returned by an unfiltered admin listing of appointments.
pub const MAX_LISTED_APPOINTMENTS: usize = 500;
pub const MAX_SQL_LEN: usize = 16 * 1024;
