use crate::model::*;

/// First booking on `day` whose slot intersects `candidate`, ignoring `exclude`.
///
/// Slots are half-open, so back-to-back appointments (09:00-10:00 and
/// 10:00-11:00) do not conflict. A visit never conflicts with itself, which
/// lets a reschedule keep its own slot or shift inside it.
pub fn find_overlap(day: &DayBook, candidate: &Slot, exclude: Option<VisitId>) -> Option<VisitId> {
    day.overlapping(candidate)
        .find(|b| Some(b.id) != exclude)
        .map(|b| b.id)
}

/// Same test over an arbitrary set of bookings, for stores that do not keep
/// sorted day books.
pub fn first_overlap<'a>(
    booked: impl IntoIterator<Item = &'a Booked>,
    candidate: &Slot,
    exclude: Option<VisitId>,
) -> Option<VisitId> {
    booked
        .into_iter()
        .find(|b| Some(b.id) != exclude && b.slot.overlaps(candidate))
        .map(|b| b.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use ulid::Ulid;

    fn at(h: u32, m: u32) -> Slot {
        Slot::starting_at(NaiveTime::from_hms_opt(h, m, 0).unwrap())
    }

    fn day_with(starts: &[(u32, u32)]) -> (DayBook, Vec<VisitId>) {
        let mut day = DayBook::new(NaiveDate::from_ymd_opt(2026, 1, 10).unwrap());
        let mut ids = Vec::new();
        for &(h, m) in starts {
            let id = Ulid::new();
            day.insert(Booked { id, slot: at(h, m) });
            ids.push(id);
        }
        (day, ids)
    }

    #[test]
    fn partial_overlap_conflicts() {
        let (day, ids) = day_with(&[(9, 0)]);
        assert_eq!(find_overlap(&day, &at(9, 30), None), Some(ids[0]));
        assert_eq!(find_overlap(&day, &at(8, 30), None), Some(ids[0]));
    }

    #[test]
    fn identical_start_conflicts() {
        let (day, ids) = day_with(&[(11, 0)]);
        assert_eq!(find_overlap(&day, &at(11, 0), None), Some(ids[0]));
    }

    #[test]
    fn adjacent_slots_do_not_conflict() {
        let (day, _) = day_with(&[(9, 0)]);
        assert_eq!(find_overlap(&day, &at(10, 0), None), None);
        assert_eq!(find_overlap(&day, &at(8, 0), None), None);
    }

    #[test]
    fn one_minute_overlap_conflicts() {
        let (day, ids) = day_with(&[(9, 0)]);
        assert_eq!(find_overlap(&day, &at(9, 59), None), Some(ids[0]));
        assert_eq!(find_overlap(&day, &at(8, 1), None), Some(ids[0]));
    }

    #[test]
    fn self_is_excluded() {
        let (day, ids) = day_with(&[(9, 0)]);
        assert_eq!(find_overlap(&day, &at(9, 30), Some(ids[0])), None);
    }

    #[test]
    fn exclusion_does_not_hide_others() {
        let (day, ids) = day_with(&[(9, 0), (10, 0)]);
        // Moving the 09:00 visit to 09:30 now hits the 10:00 one.
        assert_eq!(find_overlap(&day, &at(9, 30), Some(ids[0])), Some(ids[1]));
    }

    #[test]
    fn unsorted_variant_agrees() {
        let (day, ids) = day_with(&[(13, 0), (9, 0), (11, 15)]);
        let mut shuffled = day.booked.clone();
        shuffled.reverse();
        for probe in [at(8, 0), at(10, 30), at(12, 15), at(14, 0), at(9, 0)] {
            assert_eq!(
                first_overlap(&shuffled, &probe, None).is_some(),
                find_overlap(&day, &probe, None).is_some(),
                "probe {probe:?}"
            );
        }
        assert_eq!(first_overlap(&shuffled, &at(11, 0), Some(ids[2])), None);
    }
}
