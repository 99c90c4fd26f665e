//! Aggregates group objects into a single spatial index entry.
//!
//! The index only sees one box per aggregate, the union of its members' boxes.
//! Pairs the index finds for an aggregate are expanded into member pairs by
//! testing the members directly, and pairs between members of the same
//! aggregate are only generated if self-collision was enabled at creation.

use std::collections::HashSet;

use thunderdome as td;

use super::{
    aabb::AABB, cells, interaction::ObjectPair, object_set::ObjectHandle, pairs::Pair,
    spatial_index::ProxyId,
};
use crate::error::BroadPhaseError;

/// Hard upper limit for the number of members in one aggregate.
pub const AGGREGATE_MEMBER_CAP: usize = 128;

/// Key type to refer to an aggregate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AggregateHandle(pub(super) td::Index);

impl AggregateHandle {
    /// Get the underlying [`thunderdome::Index`][thunderdome::Index] of this key.
    #[inline]
    pub fn index(&self) -> td::Index {
        self.0
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Aggregate {
    pub members: Vec<ObjectHandle>,
    pub max_members: usize,
    pub self_collision: bool,
    // present while the aggregate has members
    pub proxy: Option<ProxyId>,
    // bounds need recomputing before the next step
    pub dirty: bool,
}

impl Aggregate {
    #[inline]
    pub fn is_full(&self) -> bool {
        self.members.len() >= self.max_members
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct AggregateSet {
    aggregates: td::Arena<Aggregate>,
}

impl AggregateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &mut self,
        max_members: usize,
        self_collision: bool,
    ) -> Result<AggregateHandle, BroadPhaseError> {
        if max_members == 0 || max_members > AGGREGATE_MEMBER_CAP {
            return Err(BroadPhaseError::AggregateCapacity {
                requested: max_members,
                max: AGGREGATE_MEMBER_CAP,
            });
        }
        Ok(AggregateHandle(self.aggregates.insert(Aggregate {
            members: Vec::with_capacity(max_members),
            max_members,
            self_collision,
            proxy: None,
            dirty: false,
        })))
    }

    #[inline]
    pub fn get(&self, handle: AggregateHandle) -> Option<&Aggregate> {
        self.aggregates.get(handle.0)
    }

    #[inline]
    pub fn get_mut(&mut self, handle: AggregateHandle) -> Option<&mut Aggregate> {
        self.aggregates.get_mut(handle.0)
    }

    pub fn try_get_mut(
        &mut self,
        handle: AggregateHandle,
    ) -> Result<&mut Aggregate, BroadPhaseError> {
        self.get_mut(handle)
            .ok_or(BroadPhaseError::StaleAggregate(handle))
    }

    #[inline]
    pub fn remove(&mut self, handle: AggregateHandle) -> Option<Aggregate> {
        self.aggregates.remove(handle.0)
    }

    pub fn iter(&self) -> impl '_ + Iterator<Item = (AggregateHandle, &Aggregate)> {
        self.aggregates
            .iter()
            .map(|(idx, agg)| (AggregateHandle(idx), agg))
    }

    pub fn iter_mut(&mut self) -> impl '_ + Iterator<Item = (AggregateHandle, &mut Aggregate)> {
        self.aggregates
            .iter_mut()
            .map(|(idx, agg)| (AggregateHandle(idx), agg))
    }
}

/// Union of a set of boxes, `None` if there are none.
pub(crate) fn bounds_of(boxes: &[(ObjectHandle, AABB)]) -> Option<AABB> {
    boxes.iter().map(|(_, aabb)| *aabb).reduce(|a, b| a.union(&b))
}

/// Collect overlapping pairs between two groups of boxes.
pub(crate) fn cross_pairs(
    group_a: &[(ObjectHandle, AABB)],
    group_b: &[(ObjectHandle, AABB)],
    out: &mut HashSet<ObjectPair>,
) {
    for (a, aabb_a) in group_a {
        for (b, aabb_b) in group_b {
            if a != b && aabb_a.intersects(aabb_b) {
                out.insert(Pair::new(*a, *b));
            }
        }
    }
}

/// Collect overlapping pairs within one group of boxes.
pub(crate) fn self_pairs(members: &mut [(ObjectHandle, AABB)], out: &mut HashSet<ObjectPair>) {
    cells::prune_sorted(members, |a, b| {
        out.insert(Pair::new(a, b));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;

    fn boxes(arena: &mut td::Arena<()>, xs: &[f64]) -> Vec<(ObjectHandle, AABB)> {
        xs.iter()
            .map(|&x| {
                (
                    ObjectHandle(arena.insert(())),
                    AABB::from_center_extents(Vec3::new(x, 0.0, 0.0), Vec3::broadcast(0.5)),
                )
            })
            .collect()
    }

    #[test]
    fn capacity_limits() {
        let mut set = AggregateSet::new();
        assert!(set.create(AGGREGATE_MEMBER_CAP, true).is_ok());
        assert_eq!(
            set.create(AGGREGATE_MEMBER_CAP + 1, true),
            Err(BroadPhaseError::AggregateCapacity {
                requested: AGGREGATE_MEMBER_CAP + 1,
                max: AGGREGATE_MEMBER_CAP
            })
        );
        assert!(set.create(0, false).is_err());

        let h = set.create(1, false).unwrap();
        let member = boxes(&mut td::Arena::new(), &[0.0])[0].0;
        set.get_mut(h).unwrap().members.push(member);
        assert!(set.get(h).unwrap().is_full());
        set.remove(h);
        assert_eq!(
            set.try_get_mut(h).unwrap_err(),
            BroadPhaseError::StaleAggregate(h)
        );
    }

    #[test]
    fn member_pairs() {
        let mut arena = td::Arena::new();
        let group = boxes(&mut arena, &[0.0, 0.8, 5.0]);
        assert_eq!(
            bounds_of(&group).map(|b| b.extent(crate::math::Axis::X)),
            Some(5.5)
        );

        let mut within = HashSet::new();
        self_pairs(&mut group.clone(), &mut within);
        assert_eq!(within.len(), 1);
        assert!(within.contains(&Pair::new(group[0].0, group[1].0)));

        let others = boxes(&mut arena, &[5.9, 20.0]);
        let mut across = HashSet::new();
        cross_pairs(&group, &others, &mut across);
        assert_eq!(across.len(), 1);
        assert!(across.contains(&Pair::new(group[2].0, others[0].0)));
    }
}
