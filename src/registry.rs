//! Owners and animals: the records a visit hangs off.
//!
//! Uniqueness of owner emails and animal passports is enforced through
//! secondary indexes claimed with `DashMap::entry`, so two concurrent
//! registrations of the same value cannot both succeed.

use chrono::NaiveDate;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::engine::EngineError;
use crate::limits::*;
use crate::model::*;

#[derive(Default)]
pub struct Registry {
    owners: DashMap<OwnerId, Owner>,
    animals: DashMap<AnimalId, Animal>,
    /// Lowercased email → owner.
    emails: DashMap<String, OwnerId>,
    /// Passport → animal.
    passports: DashMap<String, AnimalId>,
}

fn invalid(field: &'static str, reason: impl Into<String>) -> EngineError {
    EngineError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn required(field: &'static str, value: &str, max: usize) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(invalid(field, "is required"));
    }
    if value.chars().count() > max {
        return Err(invalid(field, format!("must be at most {max} characters")));
    }
    Ok(())
}

fn name_length(field: &'static str, value: &str) -> Result<(), EngineError> {
    required(field, value, MAX_NAME_LEN)?;
    let len = value.trim().chars().count();
    if len < MIN_NAME_LEN {
        return Err(invalid(
            field,
            format!("must be {MIN_NAME_LEN} to {MAX_NAME_LEN} characters"),
        ));
    }
    Ok(())
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphabetic()
        || ('А'..='я').contains(&c)
        || c == 'Ё'
        || c == 'ё'
        || c.is_whitespace()
        || c == '-'
}

pub fn validate_owner(owner: &Owner) -> Result<(), EngineError> {
    name_length("name", &owner.name)?;
    if !owner.name.chars().all(is_name_char) {
        return Err(invalid("name", "may contain only letters, spaces and hyphens"));
    }

    required("email", &owner.email, MAX_EMAIL_LEN)?;
    if !is_email(&owner.email) {
        return Err(invalid("email", "is not a valid address"));
    }

    let phone = owner.phone.as_bytes();
    if phone.len() != 11 || phone[0] != b'8' || !phone.iter().all(u8::is_ascii_digit) {
        return Err(invalid("phone", "must be 8 followed by ten digits"));
    }
    Ok(())
}

pub fn validate_animal(animal: &Animal, today: NaiveDate) -> Result<(), EngineError> {
    name_length("name", &animal.name)?;
    required("species", &animal.species, MAX_FIELD_LEN)?;
    required("breed", &animal.breed, MAX_FIELD_LEN)?;
    required("passport", &animal.passport, MAX_PASSPORT_LEN)?;
    if animal.birth_date > today {
        return Err(invalid("birth_date", "is in the future"));
    }
    Ok(())
}

fn is_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !value.chars().any(char::is_whitespace)
        && domain
            .split('.')
            .all(|label| !label.is_empty() && !label.starts_with('-') && !label.ends_with('-'))
}

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Owners ──────────────────────────────────────────────

    pub fn owner(&self, id: OwnerId) -> Option<Owner> {
        self.owners.get(&id).map(|e| e.value().clone())
    }

    pub fn owners(&self) -> Vec<Owner> {
        let mut all: Vec<Owner> = self.owners.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|o| o.id);
        all
    }

    pub fn register_owner(&self, owner: Owner) -> Result<Owner, EngineError> {
        validate_owner(&owner)?;
        if self.owners.contains_key(&owner.id) {
            return Err(EngineError::AlreadyExists(owner.id));
        }
        self.claim_email(&owner.email, owner.id)?;
        match self.owners.entry(owner.id) {
            Entry::Occupied(_) => {
                self.release_email(&owner.email, owner.id);
                Err(EngineError::AlreadyExists(owner.id))
            }
            Entry::Vacant(slot) => {
                slot.insert(owner.clone());
                Ok(owner)
            }
        }
    }

    pub fn update_owner(&self, owner: Owner) -> Result<Owner, EngineError> {
        validate_owner(&owner)?;
        let previous = self.owner(owner.id).ok_or(EngineError::NotFound(owner.id))?;
        let changed = email_key(&previous.email) != email_key(&owner.email);
        if changed {
            self.claim_email(&owner.email, owner.id)?;
        }
        self.owners.insert(owner.id, owner.clone());
        if changed {
            self.release_email(&previous.email, owner.id);
        }
        Ok(owner)
    }

    /// Remove an owner together with every animal registered to them.
    pub fn remove_owner(&self, id: OwnerId) -> Result<(Owner, Vec<Animal>), EngineError> {
        let (_, owner) = self.owners.remove(&id).ok_or(EngineError::NotFound(id))?;
        self.release_email(&owner.email, id);
        let pets: Vec<Animal> = self
            .animals_of(id)
            .into_iter()
            .filter_map(|a| self.remove_animal(a.id).ok())
            .collect();
        Ok((owner, pets))
    }

    fn claim_email(&self, email: &str, id: OwnerId) -> Result<(), EngineError> {
        match self.emails.entry(email_key(email)) {
            Entry::Occupied(e) if *e.get() != id => Err(EngineError::Duplicate {
                field: "email",
                value: email.to_string(),
            }),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(id);
                Ok(())
            }
        }
    }

    fn release_email(&self, email: &str, id: OwnerId) {
        self.emails.remove_if(&email_key(email), |_, owner| *owner == id);
    }

    // ── Animals ─────────────────────────────────────────────

    pub fn animal(&self, id: AnimalId) -> Option<Animal> {
        self.animals.get(&id).map(|e| e.value().clone())
    }

    pub fn animal_exists(&self, id: AnimalId) -> bool {
        self.animals.contains_key(&id)
    }

    pub fn animals(&self) -> Vec<Animal> {
        let mut all: Vec<Animal> = self.animals.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|a| a.id);
        all
    }

    pub fn animals_of(&self, owner_id: OwnerId) -> Vec<Animal> {
        let mut found: Vec<Animal> = self
            .animals
            .iter()
            .filter(|e| e.value().owner_id == owner_id)
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|a| a.id);
        found
    }

    pub fn register_animal(&self, animal: Animal, today: NaiveDate) -> Result<Animal, EngineError> {
        validate_animal(&animal, today)?;
        if !self.owners.contains_key(&animal.owner_id) {
            return Err(EngineError::NotFound(animal.owner_id));
        }
        if self.animals.contains_key(&animal.id) {
            return Err(EngineError::AlreadyExists(animal.id));
        }
        self.claim_passport(&animal.passport, animal.id)?;
        match self.animals.entry(animal.id) {
            Entry::Occupied(_) => {
                self.release_passport(&animal.passport, animal.id);
                Err(EngineError::AlreadyExists(animal.id))
            }
            Entry::Vacant(slot) => {
                slot.insert(animal.clone());
                Ok(animal)
            }
        }
    }

    /// Replace an animal's details. The owner is fixed at registration; any
    /// `owner_id` on the input is overwritten with the stored one.
    pub fn update_animal(&self, mut animal: Animal, today: NaiveDate) -> Result<Animal, EngineError> {
        let previous = self.animal(animal.id).ok_or(EngineError::NotFound(animal.id))?;
        animal.owner_id = previous.owner_id;
        validate_animal(&animal, today)?;
        let changed = previous.passport != animal.passport;
        if changed {
            self.claim_passport(&animal.passport, animal.id)?;
        }
        self.animals.insert(animal.id, animal.clone());
        if changed {
            self.release_passport(&previous.passport, animal.id);
        }
        Ok(animal)
    }

    pub fn remove_animal(&self, id: AnimalId) -> Result<Animal, EngineError> {
        let (_, animal) = self.animals.remove(&id).ok_or(EngineError::NotFound(id))?;
        self.release_passport(&animal.passport, id);
        Ok(animal)
    }

    fn claim_passport(&self, passport: &str, id: AnimalId) -> Result<(), EngineError> {
        match self.passports.entry(passport.to_string()) {
            Entry::Occupied(e) if *e.get() != id => Err(EngineError::Duplicate {
                field: "passport",
                value: passport.to_string(),
            }),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(id);
                Ok(())
            }
        }
    }

    fn release_passport(&self, passport: &str, id: AnimalId) {
        self.passports.remove_if(passport, |_, animal| *animal == id);
    }
}
