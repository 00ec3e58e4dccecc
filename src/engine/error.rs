use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use super::store::StoreError;

/// Request fields the scheduler can report as missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Date,
    Time,
    Diagnosis,
    Treatment,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Date => "date",
            Field::Time => "time",
            Field::Diagnosis => "diagnosis",
            Field::Treatment => "treatment",
        }
    }
}

/// Why a booking or reschedule was refused. Exactly one reason per refusal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingField(Field),
    DateOutOfRange { date: NaiveDate, last_date: NaiveDate },
    TimeOutOfRange { time: NaiveTime, opens_at: NaiveTime, last_start: NaiveTime },
    NoEarlierReschedule { from: NaiveDate, to: NaiveDate },
    SlotConflict(Ulid),
    CapacityExceeded(u32),
}

impl RejectReason {
    /// Stable identifier for the boundary layer.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::MissingField(_) => "missing_field",
            RejectReason::DateOutOfRange { .. } => "date_out_of_range",
            RejectReason::TimeOutOfRange { .. } => "time_out_of_range",
            RejectReason::NoEarlierReschedule { .. } => "no_earlier_reschedule",
            RejectReason::SlotConflict(_) => "slot_conflict",
            RejectReason::CapacityExceeded(_) => "capacity_exceeded",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::MissingField(field) => write!(f, "{} is required", field.as_str()),
            RejectReason::DateOutOfRange { date, last_date } => {
                write!(f, "date {date} is after the last operating date {last_date}")
            }
            RejectReason::TimeOutOfRange {
                time,
                opens_at,
                last_start,
            } => write!(
                f,
                "time {} is outside bookable hours {}-{}",
                time.format("%H:%M"),
                opens_at.format("%H:%M"),
                last_start.format("%H:%M")
            ),
            RejectReason::NoEarlierReschedule { from, to } => {
                write!(f, "cannot move visit from {from} to earlier date {to}")
            }
            RejectReason::SlotConflict(id) => write!(f, "slot overlaps visit {id}"),
            RejectReason::CapacityExceeded(cap) => {
                write!(f, "daily capacity {cap} reached")
            }
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    Rejected(RejectReason),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// A registry record breaks a field rule.
    Invalid { field: &'static str, reason: String },
    /// A unique registry field is already taken.
    Duplicate { field: &'static str, value: String },
    /// The record is still referenced by visits.
    HasVisits(Ulid),
    LimitExceeded(&'static str),
    /// The visit kept moving between dates while we waited for its lock.
    Busy(Ulid),
    Store(String),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Rejected(reason) => reason.code(),
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::Invalid { .. } => "invalid_field",
            EngineError::Duplicate { .. } => "duplicate",
            EngineError::HasVisits(_) => "has_visits",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Busy(_) => "busy",
            EngineError::Store(_) => "store_error",
        }
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            EngineError::Rejected(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = self.code();
        match self {
            EngineError::Rejected(reason) => write!(f, "{code}: {reason}"),
            EngineError::NotFound(id) => write!(f, "{code}: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "{code}: {id}"),
            EngineError::Invalid { field, reason } => write!(f, "{code}: {field} {reason}"),
            EngineError::Duplicate { field, value } => {
                write!(f, "{code}: {field} {value:?} is already registered")
            }
            EngineError::HasVisits(id) => {
                write!(f, "{code}: {id} is referenced by existing visits")
            }
            EngineError::LimitExceeded(msg) => write!(f, "{code}: {msg}"),
            EngineError::Busy(id) => write!(f, "{code}: visit {id} is being moved, retry"),
            EngineError::Store(e) => write!(f, "{code}: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<RejectReason> for EngineError {
    fn from(reason: RejectReason) -> Self {
        EngineError::Rejected(reason)
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e.to_string())
    }
}
