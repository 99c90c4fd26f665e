//! The spatial index is responsible for detecting pairs of possibly
//! intersecting objects for further, more accurate narrow phase inspection.
//!
//! Indices only deal in proxy ids and boxes. Mapping proxies back to
//! objects and aggregates is the job of the [`BroadPhase`][super::BroadPhase].

use super::{
    aabb::AABB,
    pairs::{Pair, PairDelta},
    region::{RegionHandle, RegionInfo},
};
use crate::error::BroadPhaseError;

/// Dense id of an entry in a spatial index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ProxyId(pub(crate) u32);

impl ProxyId {
    #[inline]
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

pub(crate) type ProxyPair = Pair<ProxyId>;

/// Common interface of the spatial index strategies.
///
/// Inserts, updates and removals record changes to the set of overlapping
/// pairs, and [`step`][SpatialIndex::step] hands out the net change since
/// the previous step. Every pair that starts overlapping is reported found
/// exactly once and every found pair that stops overlapping is reported lost
/// exactly once, regardless of strategy.
pub(crate) trait SpatialIndex: Send + Sync {
    fn insert(&mut self, id: ProxyId, aabb: AABB);
    fn update(&mut self, id: ProxyId, aabb: AABB);
    fn remove(&mut self, id: ProxyId);
    fn step(&mut self, delta: &mut PairDelta<ProxyId>);

    fn requires_explicit_regions(&self) -> bool {
        false
    }

    /// Whether the proxy currently participates in pair discovery.
    /// Always true for strategies that don't use regions.
    fn is_in_bounds(&self, _id: ProxyId) -> bool {
        true
    }

    fn max_regions(&self) -> usize {
        0
    }

    fn add_region(
        &mut self,
        _bounds: AABB,
        _user_data: u64,
        _populate: bool,
    ) -> Result<RegionHandle, BroadPhaseError> {
        Err(BroadPhaseError::RegionsUnsupported)
    }

    /// Remove a region, returning the proxies that were members of it.
    fn remove_region(&mut self, _region: RegionHandle) -> Result<Vec<ProxyId>, BroadPhaseError> {
        Err(BroadPhaseError::RegionsUnsupported)
    }

    fn regions(&self) -> Vec<RegionInfo> {
        Vec::new()
    }

    /// Regions the proxy belongs to, in ascending slot order.
    fn regions_of(&self, _id: ProxyId) -> Vec<RegionHandle> {
        Vec::new()
    }
}
