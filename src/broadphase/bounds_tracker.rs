//! Keeping track of objects that have left every region.
//!
//! Each proxy is either in bounds or out of bounds. Proxies are checked
//! at the start of a step if they were inserted, moved, or lost a region
//! since the previous one, and a notification is produced only when the
//! state actually changes.

use std::collections::HashSet;

use super::{aggregate::AggregateHandle, object_set::ObjectHandle, spatial_index::ProxyId};

/// The thing whose bounds state changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BoundsTarget {
    Object(ObjectHandle),
    Aggregate(AggregateHandle),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BoundsEvent {
    /// Left every region. No new pairs are found for it until it comes back,
    /// but existing pairs are kept until they separate.
    OutOfBounds(BoundsTarget),
    /// Entered a region again after being out of bounds.
    BackInBounds(BoundsTarget),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BoundsState {
    InBounds,
    OutOfBounds,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct BoundsTracker {
    out: HashSet<ProxyId>,
    dirty: HashSet<ProxyId>,
}

impl BoundsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule the proxy to be checked on the next update.
    #[inline]
    pub fn mark(&mut self, id: ProxyId) {
        self.dirty.insert(id);
    }

    /// Drop all state for a proxy without producing a transition.
    /// Returns whether it was out of bounds.
    pub fn forget(&mut self, id: ProxyId) -> bool {
        self.dirty.remove(&id);
        self.out.remove(&id)
    }

    #[inline]
    pub fn is_out(&self, id: ProxyId) -> bool {
        self.out.contains(&id)
    }

    #[inline]
    pub fn out_count(&self) -> usize {
        self.out.len()
    }

    /// Check every marked proxy and return the ones whose state changed,
    /// along with their new state, in proxy order.
    ///
    /// `in_bounds` returns `None` for proxies that no longer exist.
    pub fn update(
        &mut self,
        in_bounds: impl Fn(ProxyId) -> Option<bool>,
    ) -> Vec<(ProxyId, BoundsState)> {
        let mut ids: Vec<ProxyId> = self.dirty.drain().collect();
        ids.sort_unstable();
        let mut transitions = Vec::new();
        for id in ids {
            let Some(inside) = in_bounds(id) else {
                continue;
            };
            if inside && self.out.remove(&id) {
                transitions.push((id, BoundsState::InBounds));
            } else if !inside && self.out.insert(id) {
                transitions.push((id, BoundsState::OutOfBounds));
            }
        }
        transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_only_on_change() {
        let mut t = BoundsTracker::new();
        let (a, b) = (ProxyId(0), ProxyId(1));
        t.mark(a);
        t.mark(b);
        assert!(t.update(|_| Some(true)).is_empty());

        t.mark(b);
        assert_eq!(t.update(|_| Some(false)), vec![(b, BoundsState::OutOfBounds)]);
        // repeated updates while outside produce nothing
        for _ in 0..3 {
            t.mark(b);
            assert!(t.update(|_| Some(false)).is_empty());
        }
        assert!(t.is_out(b) && !t.is_out(a));

        t.mark(a);
        t.mark(b);
        assert_eq!(t.update(|_| Some(true)), vec![(b, BoundsState::InBounds)]);
        assert_eq!(t.out_count(), 0);
    }

    #[test]
    fn removed_proxies_are_skipped() {
        let mut t = BoundsTracker::new();
        t.mark(ProxyId(3));
        assert!(t.update(|_| None).is_empty());

        t.mark(ProxyId(3));
        t.update(|_| Some(false));
        assert!(t.forget(ProxyId(3)));
        assert!(!t.forget(ProxyId(3)));
    }
}
