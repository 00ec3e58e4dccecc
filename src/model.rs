use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::SLOT_MINUTES;

pub type VisitId = Ulid;
pub type AnimalId = Ulid;
pub type OwnerId = Ulid;

/// Minutes since midnight. The only time-of-day unit the scheduler compares.
pub type Minute = i32;

/// Truncate a time-of-day to whole minutes.
pub fn normalize_time(time: NaiveTime) -> NaiveTime {
    time.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(time)
}

pub fn minute_of_day(time: NaiveTime) -> Minute {
    (time.hour() * 60 + time.minute()) as Minute
}

/// Half-open interval `[start, end)` in minutes of a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: Minute,
    pub end: Minute,
}

impl Slot {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Slot start must be before end");
        Self { start, end }
    }

    /// The fixed-length appointment slot beginning at `time`.
    pub fn starting_at(time: NaiveTime) -> Self {
        let start = minute_of_day(time);
        Self::new(start, start + SLOT_MINUTES)
    }

    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A booked appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub id: VisitId,
    pub animal_id: AnimalId,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub diagnosis: String,
    pub treatment: String,
}

impl Visit {
    pub fn slot(&self) -> Slot {
        Slot::starting_at(self.time)
    }

    /// Copy of this visit moved to `date`/`time`.
    ///
    /// Diagnosis, treatment and animal are always taken from `self`: they are
    /// fixed when the visit is booked, and whatever a caller sent for them in
    /// an edit request never reaches the stored record.
    pub fn rescheduled(&self, date: NaiveDate, time: NaiveTime) -> Visit {
        Visit {
            id: self.id,
            animal_id: self.animal_id,
            date,
            time,
            diagnosis: self.diagnosis.clone(),
            treatment: self.treatment.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: OwnerId,
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Animal {
    pub id: AnimalId,
    pub owner_id: OwnerId,
    pub name: String,
    pub species: String,
    pub breed: String,
    pub birth_date: NaiveDate,
    pub passport: String,
}

/// A slot occupied on a day book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Booked {
    pub id: VisitId,
    pub slot: Slot,
}

/// All bookings of one calendar date, sorted by `slot.start`.
#[derive(Debug, Clone)]
pub struct DayBook {
    pub date: NaiveDate,
    pub booked: Vec<Booked>,
}

impl DayBook {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            booked: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.booked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.booked.is_empty()
    }

    /// Insert a booking maintaining sort order by slot start.
    pub fn insert(&mut self, booked: Booked) {
        let pos = self
            .booked
            .binary_search_by_key(&booked.slot.start, |b| b.slot.start)
            .unwrap_or_else(|e| e);
        self.booked.insert(pos, booked);
    }

    pub fn remove(&mut self, id: VisitId) -> Option<Booked> {
        let pos = self.booked.iter().position(|b| b.id == id)?;
        Some(self.booked.remove(pos))
    }

    /// Bookings whose slot overlaps `query`.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Slot) -> impl Iterator<Item = &Booked> {
        let right_bound = self.booked.partition_point(|b| b.slot.start < query.end);
        self.booked[..right_bound]
            .iter()
            .filter(move |b| b.slot.end > query.start)
    }
}

/// A proposed date/time pair as it arrives from a caller. Either half may be
/// missing; the validator reports that instead of the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Proposal {
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
}

impl Proposal {
    pub fn new(date: NaiveDate, time: NaiveTime) -> Self {
        Self {
            date: Some(date),
            time: Some(time),
        }
    }
}

/// Input of the create operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    /// Caller-chosen id; a fresh ULID is generated when absent.
    pub id: Option<VisitId>,
    pub animal_id: AnimalId,
    pub when: Proposal,
    pub diagnosis: String,
    pub treatment: String,
}

/// Input of the reschedule operation. The immutable fields are carried only
/// so callers can submit a whole edited record; they are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitEdit {
    pub when: Proposal,
    pub animal_id: Option<AnimalId>,
    pub diagnosis: Option<String>,
    pub treatment: Option<String>,
}

impl VisitEdit {
    pub fn new(date: NaiveDate, time: NaiveTime) -> Self {
        Self {
            when: Proposal::new(date, time),
            ..Self::default()
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayLoad {
    pub date: NaiveDate,
    pub booked: u32,
    pub remaining: u32,
}
