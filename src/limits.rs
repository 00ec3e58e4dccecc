/// Appointment length. Every visit occupies exactly this many minutes.
pub const SLOT_MINUTES: i32 = 60;

/// Bookings allowed on one calendar date unless configured otherwise.
pub const DEFAULT_DAILY_CAPACITY: u32 = 8;

pub const MAX_TEXT_LEN: usize = 4096;
pub const MIN_NAME_LEN: usize = 2;
pub const MAX_NAME_LEN: usize = 50;
pub const MAX_FIELD_LEN: usize = 100;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_PASSPORT_LEN: usize = 64;

/// Times a lifecycle operation re-reads a visit whose date moved while it
/// waited for the date lock.
pub const MAX_LOCK_ATTEMPTS: usize = 8;
