use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::MAX_TEXT_LEN;
use crate::model::*;
use crate::observability::{VISITS_ADMITTED_TOTAL, VISITS_REJECTED_TOTAL};

use super::validator::{DayFacts, Prior, Target, admit, screen};
use super::{Engine, EngineError, Field, RejectReason};

fn check_text(field: Field, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(RejectReason::MissingField(field).into());
    }
    if value.len() > MAX_TEXT_LEN {
        return Err(EngineError::LimitExceeded(match field {
            Field::Diagnosis => "diagnosis too long",
            _ => "treatment too long",
        }));
    }
    Ok(())
}

fn record_outcome(op: &'static str, result: &Result<Visit, EngineError>) {
    match result {
        Ok(_) => {
            metrics::counter!(VISITS_ADMITTED_TOTAL, "op" => op).increment(1);
        }
        Err(EngineError::Rejected(reason)) => {
            metrics::counter!(VISITS_REJECTED_TOTAL, "op" => op, "reason" => reason.code())
                .increment(1);
        }
        Err(_) => {}
    }
}

impl Engine {
    /// Read what the validator needs to know about `target`'s day.
    /// Caller must hold the date lock.
    async fn day_facts(&self, target: &Target, exclude: Option<VisitId>) -> Result<DayFacts, EngineError> {
        let conflict = self
            .store
            .find_overlapping_visit(target.date, target.slot(), exclude)
            .await?;
        let booked = self.store.count_visits_on_date(target.date).await?;
        Ok(DayFacts { conflict, booked })
    }

    /// Book a new visit. Nothing is stored unless every check passes.
    pub async fn create_visit(&self, request: BookingRequest) -> Result<Visit, EngineError> {
        let result = self.try_create_visit(request).await;
        record_outcome("create", &result);
        result
    }

    async fn try_create_visit(&self, request: BookingRequest) -> Result<Visit, EngineError> {
        check_text(Field::Diagnosis, &request.diagnosis)?;
        check_text(Field::Treatment, &request.treatment)?;
        let target = screen(&self.config, &request.when, None)?;

        let _gate = self.animal_gate.read().await;
        if !self.registry.animal_exists(request.animal_id) {
            return Err(EngineError::NotFound(request.animal_id));
        }

        let id = request.id.unwrap_or_else(Ulid::new);
        let _guards = self.locks.lock(&[target.date]).await;
        if self.store.load_visit(id).await?.is_some() {
            return Err(EngineError::AlreadyExists(id));
        }

        let facts = self.day_facts(&target, None).await?;
        let Target { date, time } = admit(&self.config, target, None, &facts).into_result()?;

        let visit = Visit {
            id,
            animal_id: request.animal_id,
            date,
            time,
            diagnosis: request.diagnosis,
            treatment: request.treatment,
        };
        let visit = self.store.save_visit(visit).await?;
        info!(id = %visit.id, animal = %visit.animal_id, date = %visit.date, time = %visit.time, "visit booked");
        Ok(visit)
    }

    /// Move a visit to a new date/time. Only `edit.when` is used; the
    /// diagnosis, treatment and animal of the stored visit are kept.
    pub async fn reschedule_visit(&self, id: VisitId, edit: VisitEdit) -> Result<Visit, EngineError> {
        let result = self.try_reschedule_visit(id, edit).await;
        record_outcome("reschedule", &result);
        result
    }

    async fn try_reschedule_visit(&self, id: VisitId, edit: VisitEdit) -> Result<Visit, EngineError> {
        if edit.animal_id.is_some() || edit.diagnosis.is_some() || edit.treatment.is_some() {
            debug!(%id, "ignoring immutable fields in visit edit");
        }

        // Screen against the unlocked read first so hopeless requests never
        // queue on a date lock.
        let seen = self
            .store
            .load_visit(id)
            .await?
            .ok_or(EngineError::NotFound(id))?;
        let target = screen(&self.config, &edit.when, Some(&Prior::from(&seen)))?;

        let (current, _guards) = self.lock_visit(id, Some(target.date)).await?;
        let prior = Prior::from(&current);
        let target = screen(&self.config, &edit.when, Some(&prior))?;

        let facts = self.day_facts(&target, Some(id)).await?;
        let Target { date, time } = admit(&self.config, target, Some(&prior), &facts).into_result()?;

        let moved = current.rescheduled(date, time);
        let moved = self.store.save_visit(moved).await?;
        info!(%id, from = %current.date, to = %moved.date, time = %moved.time, "visit rescheduled");
        Ok(moved)
    }

    pub async fn delete_visit(&self, id: VisitId) -> Result<Visit, EngineError> {
        let (_, _guards) = self.lock_visit(id, None).await?;
        let removed = self
            .store
            .delete_visit(id)
            .await?
            .ok_or(EngineError::NotFound(id))?;
        info!(%id, date = %removed.date, "visit deleted");
        Ok(removed)
    }

    // ── Owners & animals ────────────────────────────────────────

    pub async fn register_owner(&self, owner: Owner) -> Result<Owner, EngineError> {
        let _gate = self.animal_gate.write().await;
        let owner = self.registry.register_owner(owner)?;
        info!(id = %owner.id, "owner registered");
        Ok(owner)
    }

    pub async fn update_owner(&self, owner: Owner) -> Result<Owner, EngineError> {
        let _gate = self.animal_gate.write().await;
        self.registry.update_owner(owner)
    }

    /// Remove an owner and all of their animals. Refused while any of those
    /// animals still has visits.
    pub async fn delete_owner(&self, id: OwnerId) -> Result<Owner, EngineError> {
        let _gate = self.animal_gate.write().await;
        if self.registry.owner(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        for animal in self.registry.animals_of(id) {
            if !self.store.visits_for_animal(animal.id).await?.is_empty() {
                return Err(EngineError::HasVisits(animal.id));
            }
        }
        let (owner, pets) = self.registry.remove_owner(id)?;
        info!(%id, animals = pets.len(), "owner deleted");
        Ok(owner)
    }

    pub async fn register_animal(&self, animal: Animal) -> Result<Animal, EngineError> {
        let _gate = self.animal_gate.write().await;
        let animal = self.registry.register_animal(animal, Self::today())?;
        info!(id = %animal.id, owner = %animal.owner_id, "animal registered");
        Ok(animal)
    }

    pub async fn update_animal(&self, animal: Animal) -> Result<Animal, EngineError> {
        let _gate = self.animal_gate.write().await;
        self.registry.update_animal(animal, Self::today())
    }

    pub async fn delete_animal(&self, id: AnimalId) -> Result<Animal, EngineError> {
        let _gate = self.animal_gate.write().await;
        if !self.registry.animal_exists(id) {
            return Err(EngineError::NotFound(id));
        }
        if !self.store.visits_for_animal(id).await?.is_empty() {
            return Err(EngineError::HasVisits(id));
        }
        let animal = self.registry.remove_animal(id)?;
        info!(%id, "animal deleted");
        Ok(animal)
    }
}
