pub mod capacity;
mod error;
pub mod locks;
mod mutations;
pub mod overlap;
mod queries;
pub mod store;
pub mod validator;

pub use error::{EngineError, Field, RejectReason};
pub use locks::{DateGuards, DateLocks};
pub use store::{InMemoryStore, StoreError, VisitStore};

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::ClinicConfig;
use crate::limits::MAX_LOCK_ATTEMPTS;
use crate::model::*;
use crate::registry::Registry;

pub struct Engine {
    pub(super) store: Arc<dyn VisitStore>,
    config: ClinicConfig,
    pub locks: DateLocks,
    pub registry: Registry,
    /// Visit creation holds this for reading, animal and owner mutations for
    /// writing, so no visit is booked for an animal that is being removed.
    pub(super) animal_gate: RwLock<()>,
}

impl Engine {
    pub fn new(config: ClinicConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryStore::new()))
    }

    pub fn with_store(config: ClinicConfig, store: Arc<dyn VisitStore>) -> Self {
        Self {
            store,
            config,
            locks: DateLocks::new(),
            registry: Registry::new(),
            animal_gate: RwLock::new(()),
        }
    }

    pub fn config(&self) -> &ClinicConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn VisitStore> {
        &self.store
    }

    pub(super) fn today() -> NaiveDate {
        chrono::Local::now().date_naive()
    }

    /// Load a visit and lock its date (plus `also`, if given).
    ///
    /// The date is only known after an unlocked read, and another task may
    /// move the visit before we get the lock, so the record is re-read under
    /// the lock and the whole thing retried if its date changed.
    pub(super) async fn lock_visit(
        &self,
        id: VisitId,
        also: Option<NaiveDate>,
    ) -> Result<(Visit, DateGuards), EngineError> {
        for attempt in 0..MAX_LOCK_ATTEMPTS {
            let seen = self
                .store
                .load_visit(id)
                .await?
                .ok_or(EngineError::NotFound(id))?;

            let mut dates = vec![seen.date];
            dates.extend(also);
            let guards = self.locks.lock(&dates).await;

            let current = self
                .store
                .load_visit(id)
                .await?
                .ok_or(EngineError::NotFound(id))?;
            if current.date == seen.date {
                return Ok((current, guards));
            }

            debug!(%id, attempt, from = %seen.date, to = %current.date, "visit moved while locking");
            metrics::counter!(crate::observability::LOCK_RETRIES_TOTAL).increment(1);
        }
        Err(EngineError::Busy(id))
    }
}
