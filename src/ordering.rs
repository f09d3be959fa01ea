//! Fractional sort keys for statuses and tasks.
//!
//! Each ordered entity carries an `f64` weight; siblings are read back in
//! ascending `(weight, id)` order. Moving one entity only writes that
//! entity's weight: the new value is the midpoint of its new neighbours, the
//! end of the list plus a fixed increment, or half the first weight.
//!
//! Midpoints between the same two neighbours halve the gap every time, so
//! precision eventually runs out. When a candidate weight is not strictly
//! between its neighbours the whole sibling set is renumbered to
//! `increment, 2 * increment, ...` in its current order and the placement is
//! computed again. Nothing here fails: every call yields a usable weight.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Gap between consecutive weights after a renumber, and the distance
/// appended when placing at the end.
pub const DEFAULT_WEIGHT_INCREMENT: f64 = 200.0;

/// One entity of an ordered collection as seen by the ordering logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sibling<Id> {
    pub id: Id,
    pub weight: f64,
}

impl<Id> Sibling<Id> {
    pub fn new(id: Id, weight: f64) -> Self {
        Self { id, weight }
    }
}

/// Requested destination of a moved entity, relative to its new siblings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position<Id> {
    Start,
    End,
    Before(Id),
    After(Id),
}

impl<Id> Position<Id> {
    pub fn anchor(&self) -> Option<&Id> {
        match self {
            Self::Before(id) | Self::After(id) => Some(id),
            Self::Start | Self::End => None,
        }
    }
}

/// Result of placing an entity.
///
/// `renumbered` is empty unless precision ran out, in which case it holds a
/// fresh weight for every sibling; callers must persist those together with
/// `weight`.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement<Id> {
    pub weight: f64,
    pub renumbered: Vec<Sibling<Id>>,
}

impl<Id> Placement<Id> {
    pub fn needs_renumber(&self) -> bool {
        !self.renumbered.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedOrdering {
    increment: f64,
}

impl Default for WeightedOrdering {
    fn default() -> Self {
        Self {
            increment: DEFAULT_WEIGHT_INCREMENT,
        }
    }
}

impl WeightedOrdering {
    /// Non-positive or non-finite increments fall back to the default.
    pub fn new(increment: f64) -> Self {
        if increment.is_finite() && increment > 0.0 {
            Self { increment }
        } else {
            Self::default()
        }
    }

    pub fn increment(&self) -> f64 {
        self.increment
    }

    /// Compute the weight of an entity inserted at `position` among
    /// `siblings`. The moved entity itself must not be part of `siblings`.
    ///
    /// An anchor that is not among the siblings is treated as [`Position::End`].
    pub fn place<Id>(&self, siblings: &[Sibling<Id>], position: &Position<Id>) -> Placement<Id>
    where
        Id: Clone + Ord,
    {
        let mut sorted = siblings.to_vec();
        sort_siblings(&mut sorted);
        let slot = slot_for(&sorted, position);

        if let Some(weight) = self.candidate(&sorted, slot) {
            return Placement {
                weight,
                renumbered: Vec::new(),
            };
        }

        let renumbered = self.renumber(sorted.into_iter().map(|sibling| sibling.id));
        let weight = self
            .candidate(&renumbered, slot)
            .unwrap_or(self.increment * (slot as f64 + 1.0));
        Placement { weight, renumbered }
    }

    /// Assign `increment, 2 * increment, ...` to `ordered_ids` in the given
    /// order. Used both as the precision fallback and for batch reorders.
    pub fn renumber<Id>(&self, ordered_ids: impl IntoIterator<Item = Id>) -> Vec<Sibling<Id>> {
        ordered_ids
            .into_iter()
            .enumerate()
            .map(|(index, id)| Sibling::new(id, self.increment * (index as f64 + 1.0)))
            .collect()
    }

    /// Renumber siblings while keeping their current relative order.
    pub fn renumber_siblings<Id>(&self, siblings: &[Sibling<Id>]) -> Vec<Sibling<Id>>
    where
        Id: Clone + Ord,
    {
        let mut sorted = siblings.to_vec();
        sort_siblings(&mut sorted);
        self.renumber(sorted.into_iter().map(|sibling| sibling.id))
    }

    /// Candidate weight for insertion before index `slot` of `sorted`, or
    /// `None` when it would not land strictly between its neighbours.
    fn candidate<Id>(&self, sorted: &[Sibling<Id>], slot: usize) -> Option<f64> {
        let prev = slot
            .checked_sub(1)
            .and_then(|index| sorted.get(index))
            .map(|sibling| sibling.weight);
        let next = sorted.get(slot).map(|sibling| sibling.weight);

        match (prev, next) {
            (None, None) => Some(self.increment),
            (Some(low), None) => {
                let weight = low + self.increment;
                (weight.is_finite() && weight > low).then_some(weight)
            }
            (None, Some(high)) => {
                let weight = high / 2.0;
                (weight > 0.0 && weight < high).then_some(weight)
            }
            (Some(low), Some(high)) => {
                let weight = (low + high) / 2.0;
                (low < weight && weight < high).then_some(weight)
            }
        }
    }
}

/// Sort ascending by weight, ties broken by id.
pub fn sort_siblings<Id: Ord>(siblings: &mut [Sibling<Id>]) {
    siblings.sort_by(|a, b| match a.weight.total_cmp(&b.weight) {
        Ordering::Equal => a.id.cmp(&b.id),
        other => other,
    });
}

fn slot_for<Id: PartialEq>(sorted: &[Sibling<Id>], position: &Position<Id>) -> usize {
    let index_of = |id: &Id| sorted.iter().position(|sibling| &sibling.id == id);
    match position {
        Position::Start => 0,
        Position::End => sorted.len(),
        Position::Before(id) => index_of(id).unwrap_or(sorted.len()),
        Position::After(id) => index_of(id).map(|i| i + 1).unwrap_or(sorted.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn siblings(weights: &[f64]) -> Vec<Sibling<u32>> {
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| Sibling::new(i as u32 + 1, *w))
            .collect()
    }

    fn ordered_ids(state: &[Sibling<u32>]) -> Vec<u32> {
        let mut sorted = state.to_vec();
        sort_siblings(&mut sorted);
        sorted.into_iter().map(|s| s.id).collect()
    }

    #[test]
    fn test_empty_collection_gets_base_increment() {
        let ordering = WeightedOrdering::default();
        let placement = ordering.place::<u32>(&[], &Position::End);
        assert_eq!(placement.weight, 200.0);
        assert!(!placement.needs_renumber());
        assert_eq!(ordering.place::<u32>(&[], &Position::Start).weight, 200.0);
    }

    #[test]
    fn test_between_two_siblings_takes_midpoint() {
        let ordering = WeightedOrdering::default();
        let placement = ordering.place(&siblings(&[100.0, 200.0]), &Position::After(1));
        assert_eq!(placement.weight, 150.0);
        let placement = ordering.place(&siblings(&[100.0, 200.0]), &Position::Before(2));
        assert_eq!(placement.weight, 150.0);
    }

    #[test]
    fn test_end_appends_increment_to_max() {
        let ordering = WeightedOrdering::default();
        let placement = ordering.place(&siblings(&[100.0, 300.0]), &Position::End);
        assert_eq!(placement.weight, 500.0);
    }

    #[test]
    fn test_start_halves_min() {
        let ordering = WeightedOrdering::default();
        let placement = ordering.place(&siblings(&[100.0]), &Position::Start);
        assert_eq!(placement.weight, 50.0);
    }

    #[test]
    fn test_unsorted_input_is_sorted_first() {
        let ordering = WeightedOrdering::default();
        let input = vec![Sibling::new(2u32, 300.0), Sibling::new(1u32, 100.0)];
        assert_eq!(ordering.place(&input, &Position::Start).weight, 50.0);
        assert_eq!(ordering.place(&input, &Position::End).weight, 500.0);
        assert_eq!(ordering.place(&input, &Position::After(1)).weight, 200.0);
    }

    #[test]
    fn test_before_first_and_after_last_match_edges() {
        let ordering = WeightedOrdering::default();
        let set = siblings(&[100.0, 300.0]);
        assert_eq!(ordering.place(&set, &Position::Before(1)).weight, 50.0);
        assert_eq!(ordering.place(&set, &Position::After(2)).weight, 500.0);
    }

    #[test]
    fn test_unknown_anchor_degrades_to_end() {
        let ordering = WeightedOrdering::default();
        let set = siblings(&[100.0, 300.0]);
        assert_eq!(ordering.place(&set, &Position::Before(99)).weight, 500.0);
        assert_eq!(ordering.place(&set, &Position::After(99)).weight, 500.0);
    }

    #[test]
    fn test_custom_increment() {
        let ordering = WeightedOrdering::new(1000.0);
        assert_eq!(ordering.place::<u32>(&[], &Position::End).weight, 1000.0);
        assert_eq!(
            ordering.place(&siblings(&[1000.0]), &Position::End).weight,
            2000.0
        );
    }

    #[test]
    fn test_invalid_increment_falls_back_to_default() {
        assert_eq!(WeightedOrdering::new(0.0).increment(), DEFAULT_WEIGHT_INCREMENT);
        assert_eq!(WeightedOrdering::new(-5.0).increment(), DEFAULT_WEIGHT_INCREMENT);
        assert_eq!(
            WeightedOrdering::new(f64::NAN).increment(),
            DEFAULT_WEIGHT_INCREMENT
        );
    }

    #[test]
    fn test_tied_neighbours_trigger_renumber() {
        let ordering = WeightedOrdering::default();
        let placement = ordering.place(&siblings(&[100.0, 100.0]), &Position::After(1));
        assert!(placement.needs_renumber());
        assert_eq!(
            placement.renumbered,
            vec![Sibling::new(1, 200.0), Sibling::new(2, 400.0)]
        );
        assert_eq!(placement.weight, 300.0);
    }

    #[test]
    fn test_start_at_zero_triggers_renumber() {
        let ordering = WeightedOrdering::default();
        let placement = ordering.place(&siblings(&[0.0, 10.0]), &Position::Start);
        assert!(placement.needs_renumber());
        assert_eq!(placement.weight, 100.0);
        assert!(placement.weight < placement.renumbered[0].weight);
    }

    #[test]
    fn test_end_beyond_precision_triggers_renumber() {
        let ordering = WeightedOrdering::default();
        let placement = ordering.place(&siblings(&[1e300, f64::MAX]), &Position::End);
        assert!(placement.needs_renumber());
        assert_eq!(placement.weight, 600.0);
    }

    #[test]
    fn test_repeated_midpoints_exhaust_precision_then_renumber() {
        let ordering = WeightedOrdering::default();
        let mut state = vec![Sibling::new(1u32, 100.0), Sibling::new(2u32, 200.0)];
        let mut model = vec![1u32, 2];
        let mut renumbered_at = None;

        for step in 0..200u32 {
            let id = 3 + step;
            let placement = ordering.place(&state, &Position::After(1));
            if placement.needs_renumber() {
                state = placement.renumbered.clone();
                renumbered_at.get_or_insert(step);
            }
            state.push(Sibling::new(id, placement.weight));
            model.insert(1, id);

            if renumbered_at.is_some() {
                break;
            }
        }

        assert!(renumbered_at.is_some(), "precision never ran out");
        let mut sorted = state.clone();
        sort_siblings(&mut sorted);
        for pair in sorted.windows(2) {
            assert!(pair[0].weight < pair[1].weight, "weights must be distinct");
        }
        assert_eq!(ordered_ids(&state), model);
    }

    #[test]
    fn test_renumber_is_idempotent() {
        let ordering = WeightedOrdering::default();
        let set = siblings(&[3.0, 7.5, 7.5, 1000.0]);
        let once = ordering.renumber_siblings(&set);
        let twice = ordering.renumber_siblings(&once);
        assert_eq!(once, twice);
        assert_eq!(
            once.iter().map(|s| s.weight).collect::<Vec<_>>(),
            vec![200.0, 400.0, 600.0, 800.0]
        );
    }

    #[test]
    fn test_batch_reorder_follows_given_order() {
        let ordering = WeightedOrdering::default();
        let result = ordering.renumber([30u32, 10, 20]);
        assert_eq!(
            result,
            vec![
                Sibling::new(30, 200.0),
                Sibling::new(10, 400.0),
                Sibling::new(20, 600.0)
            ]
        );
    }

    #[test]
    fn test_position_deserializes_from_api_shape() {
        let start: Position<i64> = serde_json::from_str("\"start\"").unwrap();
        assert_eq!(start, Position::Start);
        let after: Position<i64> = serde_json::from_str(r#"{"after": 7}"#).unwrap();
        assert_eq!(after, Position::After(7));
        assert_eq!(after.anchor(), Some(&7));
    }

    fn model_slot(model: &[u32], position: &Position<u32>) -> usize {
        match position {
            Position::Start => 0,
            Position::End => model.len(),
            Position::Before(id) => model.iter().position(|m| m == id).unwrap_or(model.len()),
            Position::After(id) => model
                .iter()
                .position(|m| m == id)
                .map(|i| i + 1)
                .unwrap_or(model.len()),
        }
    }

    proptest! {
        #[test]
        fn test_reads_back_requested_order(
            ops in proptest::collection::vec((0u8..4, any::<prop::sample::Index>(), any::<bool>(), any::<prop::sample::Index>()), 1..80)
        ) {
            let ordering = WeightedOrdering::default();
            let mut state: Vec<Sibling<u32>> = Vec::new();
            let mut model: Vec<u32> = Vec::new();
            let mut next_id = 1u32;

            for (kind, anchor, is_move, moved) in ops {
                let id = if is_move && !model.is_empty() {
                    let id = model[moved.index(model.len())];
                    model.retain(|m| *m != id);
                    state.retain(|s| s.id != id);
                    id
                } else {
                    next_id += 1;
                    next_id
                };

                let position = match (kind, model.is_empty()) {
                    (_, true) | (0, _) => Position::Start,
                    (1, _) => Position::End,
                    (2, _) => Position::Before(model[anchor.index(model.len())]),
                    _ => Position::After(model[anchor.index(model.len())]),
                };

                let placement = ordering.place(&state, &position);
                if placement.needs_renumber() {
                    state = placement.renumbered.clone();
                }
                model.insert(model_slot(&model, &position), id);
                state.push(Sibling::new(id, placement.weight));

                prop_assert_eq!(ordered_ids(&state), model.clone());
            }
        }

        #[test]
        fn test_renumber_twice_is_stable(weights in proptest::collection::vec(-1e6f64..1e6, 0..40)) {
            let ordering = WeightedOrdering::default();
            let set = siblings(&weights);
            let once = ordering.renumber_siblings(&set);
            let twice = ordering.renumber_siblings(&once);
            prop_assert_eq!(once, twice);
        }
    }
}
