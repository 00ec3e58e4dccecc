//! The admission rules for a proposed visit date/time.
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. date and time present
//! 2. date not after the last operating date
//! 3. time between opening and the last bookable start
//! 4. (reschedule) new date not earlier than the current one
//! 5. slot free on the target date
//! 6. (date change) day not at capacity
//!
//! Steps 1-4 depend only on the request and are answered by [`screen`].
//! Steps 5-6 need a read of the target day; the caller gathers it as
//! [`DayFacts`] and hands it to [`admit`]. Nothing here touches the store.

use chrono::{NaiveDate, NaiveTime};

use crate::config::ClinicConfig;
use crate::model::*;

use super::capacity::is_full;
use super::error::{Field, RejectReason};

/// The stored state of a visit being rescheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prior {
    pub id: VisitId,
    pub date: NaiveDate,
}

impl From<&Visit> for Prior {
    fn from(v: &Visit) -> Self {
        Prior {
            id: v.id,
            date: v.date,
        }
    }
}

/// A proposal that passed the static checks, normalized to whole minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl Target {
    pub fn slot(&self) -> Slot {
        Slot::starting_at(self.time)
    }
}

/// What the target day looks like, read under its lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DayFacts {
    /// A visit (other than the one being moved) whose slot overlaps the target.
    pub conflict: Option<VisitId>,
    /// Visits currently booked on the target date.
    pub booked: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit { date: NaiveDate, time: NaiveTime },
    Reject(RejectReason),
}

impl Decision {
    pub fn into_result(self) -> Result<Target, RejectReason> {
        match self {
            Decision::Admit { date, time } => Ok(Target { date, time }),
            Decision::Reject(reason) => Err(reason),
        }
    }
}

/// Steps 1-4.
pub fn screen(
    config: &ClinicConfig,
    proposal: &Proposal,
    prior: Option<&Prior>,
) -> Result<Target, RejectReason> {
    let date = proposal.date.ok_or(RejectReason::MissingField(Field::Date))?;
    let time = proposal
        .time
        .map(normalize_time)
        .ok_or(RejectReason::MissingField(Field::Time))?;

    if date > config.last_date {
        return Err(RejectReason::DateOutOfRange {
            date,
            last_date: config.last_date,
        });
    }

    let last_start = config.last_start();
    if time < config.opens_at || time > last_start {
        return Err(RejectReason::TimeOutOfRange {
            time,
            opens_at: config.opens_at,
            last_start,
        });
    }

    if let Some(prior) = prior
        && date < prior.date
    {
        return Err(RejectReason::NoEarlierReschedule {
            from: prior.date,
            to: date,
        });
    }

    Ok(Target { date, time })
}

/// Steps 5-6 for a target that already passed [`screen`].
pub fn admit(
    config: &ClinicConfig,
    target: Target,
    prior: Option<&Prior>,
    facts: &DayFacts,
) -> Decision {
    if let Some(other) = facts.conflict {
        return Decision::Reject(RejectReason::SlotConflict(other));
    }

    // Moving within the same day never changes its load.
    let changes_day = prior.is_none_or(|p| p.date != target.date);
    if changes_day && is_full(facts.booked, config.daily_capacity) {
        return Decision::Reject(RejectReason::CapacityExceeded(config.daily_capacity));
    }

    Decision::Admit {
        date: target.date,
        time: target.time,
    }
}

/// The whole sequence, for callers that already hold the target day's facts.
pub fn decide(
    config: &ClinicConfig,
    proposal: &Proposal,
    prior: Option<&Prior>,
    facts: &DayFacts,
) -> Decision {
    match screen(config, proposal, prior) {
        Ok(target) => admit(config, target, prior, facts),
        Err(reason) => Decision::Reject(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn config() -> ClinicConfig {
        ClinicConfig::default()
    }

    fn free() -> DayFacts {
        DayFacts::default()
    }

    #[test]
    fn admits_inside_window() {
        let decision = decide(&config(), &Proposal::new(d(2026, 1, 10), t(10, 0)), None, &free());
        assert_eq!(
            decision,
            Decision::Admit {
                date: d(2026, 1, 10),
                time: t(10, 0)
            }
        );
    }

    #[test]
    fn missing_date_reported_before_time() {
        let decision = decide(&config(), &Proposal::default(), None, &free());
        assert_eq!(decision, Decision::Reject(RejectReason::MissingField(Field::Date)));

        let only_date = Proposal {
            date: Some(d(2026, 1, 10)),
            time: None,
        };
        let decision = decide(&config(), &only_date, None, &free());
        assert_eq!(decision, Decision::Reject(RejectReason::MissingField(Field::Time)));
    }

    #[test]
    fn last_date_is_inclusive() {
        let ok = decide(&config(), &Proposal::new(d(2026, 3, 12), t(9, 0)), None, &free());
        assert!(matches!(ok, Decision::Admit { .. }));

        let late = decide(&config(), &Proposal::new(d(2026, 3, 13), t(9, 0)), None, &free());
        assert_eq!(late.into_result().unwrap_err().code(), "date_out_of_range");
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let c = config();
        for ok in [t(8, 0), t(12, 45), t(15, 0)] {
            let decision = decide(&c, &Proposal::new(d(2026, 1, 10), ok), None, &free());
            assert!(matches!(decision, Decision::Admit { .. }), "{ok}");
        }
        for bad in [t(7, 30), t(7, 59), t(15, 1), t(16, 0), t(23, 0)] {
            let decision = decide(&c, &Proposal::new(d(2026, 1, 10), bad), None, &free());
            assert_eq!(
                decision.into_result().unwrap_err().code(),
                "time_out_of_range",
                "{bad}"
            );
        }
    }

    #[test]
    fn seconds_are_truncated_before_window_check() {
        let raw = NaiveTime::from_hms_opt(15, 0, 59).unwrap();
        let decision = decide(&config(), &Proposal::new(d(2026, 1, 10), raw), None, &free());
        assert_eq!(
            decision,
            Decision::Admit {
                date: d(2026, 1, 10),
                time: t(15, 0)
            }
        );
    }

    #[test]
    fn date_range_checked_before_time_window() {
        let decision = decide(&config(), &Proposal::new(d(2026, 4, 1), t(6, 0)), None, &free());
        assert_eq!(decision.into_result().unwrap_err().code(), "date_out_of_range");
    }

    #[test]
    fn earlier_reschedule_rejected() {
        let prior = Prior {
            id: Ulid::new(),
            date: d(2026, 1, 10),
        };
        let decision = decide(
            &config(),
            &Proposal::new(d(2026, 1, 5), t(9, 0)),
            Some(&prior),
            &free(),
        );
        assert_eq!(
            decision,
            Decision::Reject(RejectReason::NoEarlierReschedule {
                from: d(2026, 1, 10),
                to: d(2026, 1, 5)
            })
        );
    }

    #[test]
    fn earlier_time_same_day_is_allowed() {
        let prior = Prior {
            id: Ulid::new(),
            date: d(2026, 1, 10),
        };
        let decision = decide(
            &config(),
            &Proposal::new(d(2026, 1, 10), t(8, 0)),
            Some(&prior),
            &free(),
        );
        assert!(matches!(decision, Decision::Admit { .. }));
    }

    #[test]
    fn earlier_date_is_fine_for_new_bookings() {
        let decision = decide(&config(), &Proposal::new(d(2020, 1, 5), t(9, 0)), None, &free());
        assert!(matches!(decision, Decision::Admit { .. }));
    }

    #[test]
    fn window_checked_before_monotonicity() {
        let prior = Prior {
            id: Ulid::new(),
            date: d(2026, 1, 10),
        };
        let decision = decide(
            &config(),
            &Proposal::new(d(2026, 1, 5), t(17, 0)),
            Some(&prior),
            &free(),
        );
        assert_eq!(decision.into_result().unwrap_err().code(), "time_out_of_range");
    }

    #[test]
    fn conflict_checked_before_capacity() {
        let other = Ulid::new();
        let facts = DayFacts {
            conflict: Some(other),
            booked: 8,
        };
        let decision = decide(&config(), &Proposal::new(d(2026, 1, 10), t(9, 0)), None, &facts);
        assert_eq!(decision, Decision::Reject(RejectReason::SlotConflict(other)));
    }

    #[test]
    fn full_day_rejects_creation() {
        let facts = DayFacts {
            conflict: None,
            booked: 8,
        };
        let decision = decide(&config(), &Proposal::new(d(2026, 1, 15), t(9, 0)), None, &facts);
        assert_eq!(decision, Decision::Reject(RejectReason::CapacityExceeded(8)));
    }

    #[test]
    fn full_day_allows_same_day_time_change() {
        let prior = Prior {
            id: Ulid::new(),
            date: d(2026, 1, 15),
        };
        let facts = DayFacts {
            conflict: None,
            booked: 8,
        };
        let decision = decide(
            &config(),
            &Proposal::new(d(2026, 1, 15), t(14, 0)),
            Some(&prior),
            &facts,
        );
        assert!(matches!(decision, Decision::Admit { .. }));
    }

    #[test]
    fn full_day_rejects_move_onto_it() {
        let prior = Prior {
            id: Ulid::new(),
            date: d(2026, 1, 14),
        };
        let facts = DayFacts {
            conflict: None,
            booked: 8,
        };
        let decision = decide(
            &config(),
            &Proposal::new(d(2026, 1, 15), t(14, 0)),
            Some(&prior),
            &facts,
        );
        assert_eq!(decision, Decision::Reject(RejectReason::CapacityExceeded(8)));
    }
}
