//! Persistent records of overlapping pairs and what the filter decided about them.

use std::collections::{HashMap, HashSet};

use super::{
    events::{PairEvent, StepEvents},
    filter::{FilterDecision, FilterDisposition, PairFlags},
    object_set::ObjectHandle,
    pairs::Pair,
};
use crate::error::BroadPhaseError;

pub(crate) type ObjectPair = Pair<ObjectHandle>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub enum Classification {
    /// Filtered out for as long as the pair overlaps.
    Killed,
    /// Filtered out until either object's filter data changes.
    Suppressed,
    Active,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub enum TouchState {
    NotTouching,
    Touching,
}

/// State of an overlapping pair of objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interaction {
    pub classification: Classification,
    pub flags: PairFlags,
    pub touch: TouchState,
    // whether the filter callback was consulted for this pair
    pub(crate) via_callback: bool,
    pub(crate) found_reported: bool,
}

#[derive(Clone, Debug, Default)]
struct ObjectEntry {
    pairs: HashSet<ObjectPair>,
    active: usize,
}

/// All interactions, indexed both by pair and by object.
///
/// Only active interactions count against the per-object cap.
/// Killed and suppressed pairs are remembered without limit.
#[derive(Clone, Debug)]
pub(crate) struct InteractionTable {
    records: HashMap<ObjectPair, Interaction>,
    by_object: HashMap<ObjectHandle, ObjectEntry>,
    cap: usize,
}

impl InteractionTable {
    pub fn new(cap: usize) -> Self {
        Self {
            records: HashMap::new(),
            by_object: HashMap::new(),
            cap,
        }
    }

    #[inline]
    pub fn get(&self, pair: ObjectPair) -> Option<&Interaction> {
        self.records.get(&pair)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Number of active interactions the object has.
    pub fn active_count(&self, object: ObjectHandle) -> usize {
        self.by_object.get(&object).map_or(0, |e| e.active)
    }

    /// Every recorded pair the object is part of, in a stable order.
    pub fn pairs_of(&self, object: ObjectHandle) -> Vec<ObjectPair> {
        let mut pairs: Vec<ObjectPair> = self
            .by_object
            .get(&object)
            .map(|e| e.pairs.iter().copied().collect())
            .unwrap_or_default();
        pairs.sort_unstable();
        pairs
    }

    pub fn suppressed_pairs_of(&self, object: ObjectHandle) -> Vec<ObjectPair> {
        let mut pairs = self.pairs_of(object);
        pairs.retain(|p| {
            matches!(self.records.get(p), Some(i) if i.classification == Classification::Suppressed)
        });
        pairs
    }

    /// Record what the filter decided about a newly overlapping pair,
    /// emitting a found event if the pair is accepted with the flag for it.
    ///
    /// If the pair already has a record, the cached classification is
    /// returned and the decision ignored.
    pub fn on_pair_found(
        &mut self,
        pair: ObjectPair,
        decision: FilterDecision,
        events: &mut StepEvents,
    ) -> Result<Classification, BroadPhaseError> {
        if let Some(existing) = self.records.get(&pair) {
            return Ok(existing.classification);
        }
        self.apply(pair, decision, events)
    }

    /// Destroy the pair's record, emitting a lost event if its flags ask for
    /// one and a found event was emitted before.
    pub fn on_pair_lost(&mut self, pair: ObjectPair, events: &mut StepEvents) -> Option<Interaction> {
        let interaction = self.remove_record(pair)?;
        if interaction.classification == Classification::Active
            && interaction.found_reported
            && interaction.flags.contains(PairFlags::NOTIFY_TOUCH_LOST)
        {
            events.lost.push(PairEvent::new(pair, interaction.flags));
        }
        Some(interaction)
    }

    /// Apply a new filter decision to a suppressed pair.
    /// Pairs that aren't suppressed are left alone.
    pub fn refilter(
        &mut self,
        pair: ObjectPair,
        decision: FilterDecision,
        events: &mut StepEvents,
    ) -> Result<Classification, BroadPhaseError> {
        match self.records.get(&pair) {
            Some(i) if i.classification == Classification::Suppressed => {}
            Some(i) => return Ok(i.classification),
            None => return Err(BroadPhaseError::StaleObject(pair.lo())),
        }
        let previous = self.remove_record(pair);
        let result = self.apply(pair, decision, events);
        if let (Err(_), Some(previous)) = (&result, previous) {
            // couldn't activate, stays suppressed so a later change can try again
            self.insert_record(pair, previous);
        }
        result
    }

    fn apply(
        &mut self,
        pair: ObjectPair,
        decision: FilterDecision,
        events: &mut StepEvents,
    ) -> Result<Classification, BroadPhaseError> {
        let classification = match decision.disposition {
            FilterDisposition::Kill => Classification::Killed,
            FilterDisposition::Suppress => Classification::Suppressed,
            FilterDisposition::Default => Classification::Active,
        };
        let mut interaction = Interaction {
            classification,
            flags: decision.flags,
            touch: TouchState::NotTouching,
            via_callback: decision.callback,
            found_reported: false,
        };

        if classification == Classification::Active {
            for (object, other) in [(pair.lo(), pair.hi()), (pair.hi(), pair.lo())] {
                if self.active_count(object) >= self.cap {
                    return Err(BroadPhaseError::InteractionCapExceeded {
                        object,
                        other,
                        cap: self.cap,
                    });
                }
            }
            interaction.touch = TouchState::Touching;
            if decision.flags.contains(PairFlags::NOTIFY_TOUCH_FOUND) {
                events.found.push(PairEvent::new(pair, decision.flags));
                interaction.found_reported = true;
            }
        }

        self.insert_record(pair, interaction);
        Ok(classification)
    }

    fn insert_record(&mut self, pair: ObjectPair, interaction: Interaction) {
        let active = interaction.classification == Classification::Active;
        for object in pair.as_array() {
            let entry = self.by_object.entry(object).or_default();
            entry.pairs.insert(pair);
            if active {
                entry.active += 1;
            }
        }
        self.records.insert(pair, interaction);
    }

    fn remove_record(&mut self, pair: ObjectPair) -> Option<Interaction> {
        let interaction = self.records.remove(&pair)?;
        let active = interaction.classification == Classification::Active;
        for object in pair.as_array() {
            if let Some(entry) = self.by_object.get_mut(&object) {
                entry.pairs.remove(&pair);
                if active {
                    entry.active -= 1;
                }
                if entry.pairs.is_empty() {
                    self.by_object.remove(&object);
                }
            }
        }
        Some(interaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thunderdome as td;

    fn handles(n: usize) -> Vec<ObjectHandle> {
        let mut arena = td::Arena::new();
        (0..n).map(|_| ObjectHandle(arena.insert(()))).collect()
    }

    const NOTIFY: PairFlags = PairFlags::GENERATE_CONTACTS
        .union(PairFlags::NOTIFY_TOUCH_FOUND)
        .union(PairFlags::NOTIFY_TOUCH_LOST);

    #[test]
    fn found_and_lost_events() {
        let h = handles(3);
        let mut table = InteractionTable::new(10);
        let mut events = StepEvents::default();

        let p = Pair::new(h[0], h[1]);
        let c = table.on_pair_found(p, FilterDecision::accept(NOTIFY), &mut events);
        assert_eq!(c, Ok(Classification::Active));
        assert_eq!(events.found.len(), 1);
        assert_eq!(events.found[0].objects, p.as_array());
        assert_eq!(table.get(p).unwrap().touch, TouchState::Touching);

        // cached, no second event
        table
            .on_pair_found(p, FilterDecision::kill(), &mut events)
            .unwrap();
        assert_eq!(events.found.len(), 1);

        // accepted without notification flags: neither event fires
        let quiet = Pair::new(h[1], h[2]);
        let decision = FilterDecision::accept(PairFlags::GENERATE_CONTACTS);
        table.on_pair_found(quiet, decision, &mut events).unwrap();
        table.on_pair_lost(quiet, &mut events).unwrap();
        assert_eq!(events.found.len(), 1);
        assert!(events.lost.is_empty());

        table.on_pair_lost(p, &mut events).unwrap();
        assert_eq!(events.lost.len(), 1);
        assert!(table.on_pair_lost(p, &mut events).is_none());
        assert_eq!(table.len(), 0);
        assert_eq!(table.active_count(h[0]), 0);
    }

    #[test]
    fn lost_needs_found() {
        let h = handles(2);
        let mut table = InteractionTable::new(10);
        let mut events = StepEvents::default();
        let p = Pair::new(h[0], h[1]);
        let only_lost = FilterDecision::accept(PairFlags::NOTIFY_TOUCH_LOST);
        table.on_pair_found(p, only_lost, &mut events).unwrap();
        table.on_pair_lost(p, &mut events).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn cap_drops_only_the_excess() {
        let h = handles(6);
        let mut table = InteractionTable::new(4);
        let mut events = StepEvents::default();
        for other in &h[1..5] {
            let p = Pair::new(h[0], *other);
            table
                .on_pair_found(p, FilterDecision::accept(NOTIFY), &mut events)
                .unwrap();
        }
        let fifth = Pair::new(h[0], h[5]);
        let result = table.on_pair_found(fifth, FilterDecision::accept(NOTIFY), &mut events);
        assert_eq!(
            result,
            Err(BroadPhaseError::InteractionCapExceeded {
                object: h[0],
                other: h[5],
                cap: 4
            })
        );
        assert!(table.get(fifth).is_none());
        assert_eq!(table.active_count(h[0]), 4);
        assert_eq!(events.found.len(), 4);
        for other in &h[1..5] {
            assert!(table.get(Pair::new(h[0], *other)).is_some());
        }

        // killed and suppressed pairs don't count
        table
            .on_pair_found(fifth, FilterDecision::suppress(), &mut events)
            .unwrap();
        assert_eq!(table.active_count(h[0]), 4);
        // and a suppressed pair that can't be activated stays suppressed
        assert!(table
            .refilter(fifth, FilterDecision::accept(NOTIFY), &mut events)
            .is_err());
        assert_eq!(table.suppressed_pairs_of(h[5]), vec![fifth]);
    }

    #[test]
    fn refilter_only_touches_suppressed() {
        let h = handles(3);
        let mut table = InteractionTable::new(10);
        let mut events = StepEvents::default();
        let killed = Pair::new(h[0], h[1]);
        let suppressed = Pair::new(h[0], h[2]);
        table
            .on_pair_found(killed, FilterDecision::kill(), &mut events)
            .unwrap();
        table
            .on_pair_found(suppressed, FilterDecision::suppress(), &mut events)
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(table.suppressed_pairs_of(h[0]), vec![suppressed]);

        let accept = FilterDecision::accept(NOTIFY);
        assert_eq!(
            table.refilter(killed, accept, &mut events),
            Ok(Classification::Killed)
        );
        assert_eq!(
            table.refilter(suppressed, accept, &mut events),
            Ok(Classification::Active)
        );
        itertools::assert_equal(events.found.iter().map(|e| e.objects), [suppressed.as_array()]);
        assert!(table.suppressed_pairs_of(h[0]).is_empty());
    }
}
