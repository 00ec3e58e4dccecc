use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per calendar date. Every read-decide-write sequence on a
/// date runs while holding that date's guard.
#[derive(Default)]
pub struct DateLocks {
    locks: DashMap<NaiveDate, Arc<Mutex<()>>>,
}

/// Guards held for a set of dates. Dropping releases all of them.
pub struct DateGuards {
    dates: Vec<NaiveDate>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl DateGuards {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.dates.binary_search(&date).is_ok()
    }
}

impl DateLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, date: NaiveDate) -> Arc<Mutex<()>> {
        self.locks.entry(date).or_default().value().clone()
    }

    /// Acquire the locks for `dates` in ascending order to prevent deadlocks.
    pub async fn lock(&self, dates: &[NaiveDate]) -> DateGuards {
        let mut dates = dates.to_vec();
        dates.sort();
        dates.dedup();

        let mut guards = Vec::with_capacity(dates.len());
        for date in &dates {
            // Clone the Arc out first so no DashMap shard lock is held across the await.
            let lock = self.handle(*date);
            guards.push(lock.lock_owned().await);
        }
        DateGuards {
            dates,
            _guards: guards,
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Drop entries nobody holds or waits on. Returns how many were removed.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }
}
