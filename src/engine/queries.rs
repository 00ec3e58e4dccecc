use chrono::{NaiveDate, NaiveTime, TimeDelta};

use crate::limits::SLOT_MINUTES;
use crate::model::*;

use super::capacity::is_full;
use super::overlap::first_overlap;
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_visit(&self, id: VisitId) -> Result<Visit, EngineError> {
        self.store
            .load_visit(id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn list_visits(&self) -> Result<Vec<Visit>, EngineError> {
        Ok(self.store.list_visits().await?)
    }

    pub async fn visits_on_date(&self, date: NaiveDate) -> Result<Vec<Visit>, EngineError> {
        Ok(self.store.visits_on_date(date).await?)
    }

    pub async fn visits_for_animal(&self, animal_id: AnimalId) -> Result<Vec<Visit>, EngineError> {
        Ok(self.store.visits_for_animal(animal_id).await?)
    }

    pub fn get_owner(&self, id: OwnerId) -> Result<Owner, EngineError> {
        self.registry.owner(id).ok_or(EngineError::NotFound(id))
    }

    pub fn list_owners(&self) -> Vec<Owner> {
        self.registry.owners()
    }

    pub fn get_animal(&self, id: AnimalId) -> Result<Animal, EngineError> {
        self.registry.animal(id).ok_or(EngineError::NotFound(id))
    }

    pub fn list_animals(&self) -> Vec<Animal> {
        self.registry.animals()
    }

    pub fn animals_of_owner(&self, owner_id: OwnerId) -> Vec<Animal> {
        self.registry.animals_of(owner_id)
    }

    /// Start times on the hour grid from opening to the last bookable start
    /// that a new visit could take right now. Empty for days past the last
    /// operating date or already at capacity.
    pub async fn free_slots(&self, date: NaiveDate) -> Result<Vec<NaiveTime>, EngineError> {
        let config = self.config();
        if date > config.last_date {
            return Ok(Vec::new());
        }
        let visits = self.store.visits_on_date(date).await?;
        let booked = u32::try_from(visits.len()).unwrap_or(u32::MAX);
        if is_full(booked, config.daily_capacity) {
            return Ok(Vec::new());
        }

        let taken: Vec<Booked> = visits
            .iter()
            .map(|v| Booked {
                id: v.id,
                slot: v.slot(),
            })
            .collect();

        let step = TimeDelta::minutes(i64::from(SLOT_MINUTES));
        let last_start = config.last_start();
        let mut free = Vec::new();
        let mut start = config.opens_at;
        while start <= last_start {
            if first_overlap(&taken, &Slot::starting_at(start), None).is_none() {
                free.push(start);
            }
            let (next, wrapped) = start.overflowing_add_signed(step);
            if wrapped != 0 {
                break;
            }
            start = next;
        }
        Ok(free)
    }

    pub async fn day_load(&self, date: NaiveDate) -> Result<DayLoad, EngineError> {
        let config = self.config();
        let booked = self.store.count_visits_on_date(date).await?;
        let remaining = if date > config.last_date {
            0
        } else {
            config.daily_capacity.saturating_sub(booked)
        };
        Ok(DayLoad {
            date,
            booked,
            remaining,
        })
    }
}
