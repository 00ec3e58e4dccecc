use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;

use crate::model::*;

use super::overlap::find_overlap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Unavailable(String),
    Corrupt(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
            StoreError::Corrupt(msg) => write!(f, "store corrupt: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Keyed storage of visit records.
///
/// Implementations need not be transactional: the engine serializes every
/// read-decide-write sequence per date before calling in here.
#[async_trait]
pub trait VisitStore: Send + Sync {
    async fn count_visits_on_date(&self, date: NaiveDate) -> Result<u32, StoreError>;

    /// Some visit on `date`, other than `exclude`, whose slot overlaps `slot`.
    async fn find_overlapping_visit(
        &self,
        date: NaiveDate,
        slot: Slot,
        exclude: Option<VisitId>,
    ) -> Result<Option<VisitId>, StoreError>;

    async fn load_visit(&self, id: VisitId) -> Result<Option<Visit>, StoreError>;

    /// Insert or replace by id.
    async fn save_visit(&self, visit: Visit) -> Result<Visit, StoreError>;

    async fn delete_visit(&self, id: VisitId) -> Result<Option<Visit>, StoreError>;

    async fn visits_on_date(&self, date: NaiveDate) -> Result<Vec<Visit>, StoreError>;

    async fn visits_for_animal(&self, animal_id: AnimalId) -> Result<Vec<Visit>, StoreError>;

    async fn list_visits(&self) -> Result<Vec<Visit>, StoreError>;
}

/// Process-local store: one sorted [`DayBook`] per date plus an id index.
pub struct InMemoryStore {
    days: DashMap<NaiveDate, DayBook>,
    visits: DashMap<VisitId, Visit>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            days: DashMap::new(),
            visits: DashMap::new(),
        }
    }

    pub fn visit_count(&self) -> usize {
        self.visits.len()
    }

    fn unbook(&self, visit: &Visit) {
        let emptied = match self.days.get_mut(&visit.date) {
            Some(mut day) => {
                day.remove(visit.id);
                day.is_empty()
            }
            None => false,
        };
        if emptied {
            self.days.remove_if(&visit.date, |_, day| day.is_empty());
        }
    }

    fn book(&self, visit: &Visit) {
        self.days
            .entry(visit.date)
            .or_insert_with(|| DayBook::new(visit.date))
            .insert(Booked {
                id: visit.id,
                slot: visit.slot(),
            });
    }

    fn sorted(mut visits: Vec<Visit>) -> Vec<Visit> {
        visits.sort_by_key(|v| (v.date, v.time, v.id));
        visits
    }
}

#[async_trait]
impl VisitStore for InMemoryStore {
    async fn count_visits_on_date(&self, date: NaiveDate) -> Result<u32, StoreError> {
        let count = self.days.get(&date).map_or(0, |day| day.len());
        u32::try_from(count).map_err(|_| StoreError::Corrupt(format!("{count} visits on {date}")))
    }

    async fn find_overlapping_visit(
        &self,
        date: NaiveDate,
        slot: Slot,
        exclude: Option<VisitId>,
    ) -> Result<Option<VisitId>, StoreError> {
        Ok(self
            .days
            .get(&date)
            .and_then(|day| find_overlap(&day, &slot, exclude)))
    }

    async fn load_visit(&self, id: VisitId) -> Result<Option<Visit>, StoreError> {
        Ok(self.visits.get(&id).map(|e| e.value().clone()))
    }

    async fn save_visit(&self, visit: Visit) -> Result<Visit, StoreError> {
        if let Some(previous) = self.visits.insert(visit.id, visit.clone()) {
            self.unbook(&previous);
        }
        self.book(&visit);
        Ok(visit)
    }

    async fn delete_visit(&self, id: VisitId) -> Result<Option<Visit>, StoreError> {
        let Some((_, visit)) = self.visits.remove(&id) else {
            return Ok(None);
        };
        self.unbook(&visit);
        Ok(Some(visit))
    }

    async fn visits_on_date(&self, date: NaiveDate) -> Result<Vec<Visit>, StoreError> {
        let ids: Vec<VisitId> = self
            .days
            .get(&date)
            .map(|day| day.booked.iter().map(|b| b.id).collect())
            .unwrap_or_default();
        Ok(ids
            .into_iter()
            .filter_map(|id| self.visits.get(&id).map(|e| e.value().clone()))
            .collect())
    }

    async fn visits_for_animal(&self, animal_id: AnimalId) -> Result<Vec<Visit>, StoreError> {
        let found = self
            .visits
            .iter()
            .filter(|e| e.value().animal_id == animal_id)
            .map(|e| e.value().clone())
            .collect();
        Ok(Self::sorted(found))
    }

    async fn list_visits(&self) -> Result<Vec<Visit>, StoreError> {
        Ok(Self::sorted(
            self.visits.iter().map(|e| e.value().clone()).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use ulid::Ulid;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, day).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn visit(date: NaiveDate, time: NaiveTime) -> Visit {
        Visit {
            id: Ulid::new(),
            animal_id: Ulid::new(),
            date,
            time,
            diagnosis: "checkup".into(),
            treatment: "none".into(),
        }
    }

    #[test]
    fn save_then_count_and_load() {
        let store = InMemoryStore::new();
        let v = visit(d(10), t(9, 0));
        tokio_test::block_on(async {
            store.save_visit(v.clone()).await.unwrap();
            assert_eq!(store.count_visits_on_date(d(10)).await.unwrap(), 1);
            assert_eq!(store.count_visits_on_date(d(11)).await.unwrap(), 0);
            assert_eq!(store.load_visit(v.id).await.unwrap(), Some(v));
        });
    }

    #[tokio::test]
    async fn overlap_query_respects_exclusion() {
        let store = InMemoryStore::new();
        let v = store.save_visit(visit(d(10), t(9, 0))).await.unwrap();
        let probe = Slot::starting_at(t(9, 30));
        assert_eq!(
            store.find_overlapping_visit(d(10), probe, None).await.unwrap(),
            Some(v.id)
        );
        assert_eq!(
            store.find_overlapping_visit(d(10), probe, Some(v.id)).await.unwrap(),
            None
        );
        assert_eq!(
            store.find_overlapping_visit(d(11), probe, None).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn resave_moves_between_days() {
        let store = InMemoryStore::new();
        let v = store.save_visit(visit(d(10), t(9, 0))).await.unwrap();
        store.save_visit(v.rescheduled(d(12), t(11, 0))).await.unwrap();

        assert_eq!(store.count_visits_on_date(d(10)).await.unwrap(), 0);
        assert_eq!(store.count_visits_on_date(d(12)).await.unwrap(), 1);
        assert_eq!(store.visit_count(), 1);
        let on_12 = store.visits_on_date(d(12)).await.unwrap();
        assert_eq!(on_12[0].time, t(11, 0));
    }

    #[tokio::test]
    async fn resave_same_day_replaces_slot() {
        let store = InMemoryStore::new();
        let v = store.save_visit(visit(d(10), t(9, 0))).await.unwrap();
        store.save_visit(v.rescheduled(d(10), t(13, 0))).await.unwrap();

        assert_eq!(store.count_visits_on_date(d(10)).await.unwrap(), 1);
        assert_eq!(
            store
                .find_overlapping_visit(d(10), Slot::starting_at(t(9, 0)), None)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn delete_unbooks() {
        let store = InMemoryStore::new();
        let v = store.save_visit(visit(d(10), t(9, 0))).await.unwrap();
        assert_eq!(store.delete_visit(v.id).await.unwrap(), Some(v.clone()));
        assert_eq!(store.delete_visit(v.id).await.unwrap(), None);
        assert_eq!(store.count_visits_on_date(d(10)).await.unwrap(), 0);
        assert!(store.load_visit(v.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn visits_on_date_sorted_by_time() {
        let store = InMemoryStore::new();
        for (h, m) in [(14, 0), (8, 0), (11, 30)] {
            store.save_visit(visit(d(10), t(h, m))).await.unwrap();
        }
        store.save_visit(visit(d(11), t(8, 0))).await.unwrap();
        let times: Vec<_> = store
            .visits_on_date(d(10))
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.time)
            .collect();
        assert_eq!(times, vec![t(8, 0), t(11, 30), t(14, 0)]);
    }

    #[tokio::test]
    async fn visits_for_animal_filters() {
        let store = InMemoryStore::new();
        let pet = Ulid::new();
        let mut a = visit(d(12), t(9, 0));
        a.animal_id = pet;
        let mut b = visit(d(10), t(9, 0));
        b.animal_id = pet;
        store.save_visit(a.clone()).await.unwrap();
        store.save_visit(b.clone()).await.unwrap();
        store.save_visit(visit(d(10), t(11, 0))).await.unwrap();

        let found = store.visits_for_animal(pet).await.unwrap();
        assert_eq!(found, vec![b, a]);
        assert_eq!(store.list_visits().await.unwrap().len(), 3);
    }
}
