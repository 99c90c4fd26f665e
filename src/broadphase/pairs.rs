//! Pair bookkeeping shared by the spatial indices and the broad phase itself.

use std::{collections::HashSet, hash::Hash};

/// An unordered pair of keys.
///
/// Always stored with the smaller key first so that `(a, b)` and `(b, a)`
/// hash and compare equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub struct Pair<K>(K, K);

impl<K: Copy + Ord> Pair<K> {
    #[inline]
    pub fn new(a: K, b: K) -> Self {
        if a <= b {
            Pair(a, b)
        } else {
            Pair(b, a)
        }
    }

    /// The smaller of the two keys.
    #[inline]
    pub fn lo(&self) -> K {
        self.0
    }

    /// The larger of the two keys.
    #[inline]
    pub fn hi(&self) -> K {
        self.1
    }

    #[inline]
    pub fn as_array(&self) -> [K; 2] {
        [self.0, self.1]
    }

    #[inline]
    pub fn contains(&self, key: K) -> bool {
        self.0 == key || self.1 == key
    }
}

/// Pairs that started or stopped overlapping since the last drain.
#[derive(Clone, Debug)]
pub(crate) struct PairDelta<K> {
    pub found: Vec<Pair<K>>,
    pub lost: Vec<Pair<K>>,
}

impl<K> Default for PairDelta<K> {
    fn default() -> Self {
        Self {
            found: Vec::new(),
            lost: Vec::new(),
        }
    }
}

/// Set of overlapping pairs that remembers what has already been reported.
///
/// Pairs can be added and removed any number of times between drains.
/// Only the net change relative to the last drain is reported,
/// so a pair that appears and disappears within one step produces nothing
/// and a pair is never reported found twice without being lost in between.
#[derive(Clone, Debug)]
pub(crate) struct PairTracker<K> {
    current: HashSet<Pair<K>>,
    reported: HashSet<Pair<K>>,
    dirty: HashSet<Pair<K>>,
}

impl<K> Default for PairTracker<K> {
    fn default() -> Self {
        Self {
            current: HashSet::new(),
            reported: HashSet::new(),
            dirty: HashSet::new(),
        }
    }
}

impl<K: Copy + Ord + Hash> PairTracker<K> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add(&mut self, pair: Pair<K>) {
        if self.current.insert(pair) {
            self.dirty.insert(pair);
        }
    }

    #[inline]
    pub fn remove(&mut self, pair: Pair<K>) {
        if self.current.remove(&pair) {
            self.dirty.insert(pair);
        }
    }

    #[inline]
    pub fn contains(&self, pair: Pair<K>) -> bool {
        self.current.contains(&pair)
    }

    pub fn iter(&self) -> impl '_ + Iterator<Item = Pair<K>> {
        self.current.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    /// Pairs involving `key` that were reported found and haven't been lost since.
    pub fn reported_with(&self, key: K) -> Vec<Pair<K>> {
        let mut pairs: Vec<Pair<K>> = self
            .reported
            .iter()
            .filter(|pair| pair.contains(key))
            .copied()
            .collect();
        pairs.sort_unstable();
        pairs
    }

    /// Remove every pair involving `key`.
    pub fn remove_all_with(&mut self, key: K) {
        let dirty = &mut self.dirty;
        self.current.retain(|pair| {
            if pair.contains(key) {
                dirty.insert(*pair);
                false
            } else {
                true
            }
        });
    }

    /// Replace the whole current set, marking the difference as changed.
    pub fn replace(&mut self, new_pairs: HashSet<Pair<K>>) {
        self.dirty
            .extend(self.current.symmetric_difference(&new_pairs).copied());
        self.current = new_pairs;
    }

    /// Move the net changes since the last drain into `delta`.
    ///
    /// Output is sorted so that results don't depend on hashing order.
    pub fn drain(&mut self, delta: &mut PairDelta<K>) {
        let first_found = delta.found.len();
        let first_lost = delta.lost.len();
        for pair in self.dirty.drain() {
            if self.current.contains(&pair) {
                if self.reported.insert(pair) {
                    delta.found.push(pair);
                }
            } else if self.reported.remove(&pair) {
                delta.lost.push(pair);
            }
        }
        delta.found[first_found..].sort_unstable();
        delta.lost[first_lost..].sort_unstable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drained(t: &mut PairTracker<u32>) -> PairDelta<u32> {
        let mut delta = PairDelta::default();
        t.drain(&mut delta);
        delta
    }

    #[test]
    fn canonical_order() {
        assert_eq!(Pair::new(5, 2), Pair::new(2, 5));
        assert_eq!(Pair::new(5, 2).lo(), 2);
        assert_eq!(Pair::new(5, 2).hi(), 5);
    }

    #[test]
    fn net_changes_only() {
        let mut t = PairTracker::new();
        t.add(Pair::new(1, 2));
        t.add(Pair::new(2, 1));
        t.add(Pair::new(3, 4));
        t.remove(Pair::new(3, 4));
        let d = drained(&mut t);
        assert_eq!(d.found, vec![Pair::new(1, 2)]);
        assert!(d.lost.is_empty());

        // lost and found again within a step is no change
        t.remove(Pair::new(1, 2));
        t.add(Pair::new(1, 2));
        let d = drained(&mut t);
        assert!(d.found.is_empty() && d.lost.is_empty());

        t.remove_all_with(2);
        let d = drained(&mut t);
        assert_eq!(d.lost, vec![Pair::new(1, 2)]);
        let d = drained(&mut t);
        assert!(d.found.is_empty() && d.lost.is_empty());
    }

    #[test]
    fn replace_diffs() {
        let mut t = PairTracker::new();
        t.replace([Pair::new(0, 1), Pair::new(1, 2)].into_iter().collect());
        let d = drained(&mut t);
        itertools::assert_equal(d.found, [Pair::new(0, 1), Pair::new(1, 2)]);
        t.replace([Pair::new(1, 2), Pair::new(2, 3)].into_iter().collect());
        let d = drained(&mut t);
        itertools::assert_equal(d.found, [Pair::new(2, 3)]);
        itertools::assert_equal(d.lost, [Pair::new(0, 1)]);
    }
}
