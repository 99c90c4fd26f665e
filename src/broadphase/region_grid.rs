//! Spatial index that bins proxies into explicitly defined regions
//! and only tests pairs that share a region.

use super::{
    aabb::AABB,
    cells,
    pairs::{PairDelta, PairTracker},
    region::{RegionHandle, RegionInfo, RegionManager},
    spatial_index::{ProxyId, SpatialIndex},
};
use crate::error::BroadPhaseError;

#[derive(Debug)]
pub(crate) struct RegionGrid {
    world_bounds: AABB,
    aabbs: Vec<Option<AABB>>,
    regions: RegionManager,
    pairs: PairTracker<ProxyId>,
}

impl RegionGrid {
    pub fn new(world_bounds: AABB, max_regions: usize) -> Self {
        Self {
            world_bounds,
            aabbs: Vec::new(),
            regions: RegionManager::new(max_regions),
            pairs: PairTracker::new(),
        }
    }
}

impl SpatialIndex for RegionGrid {
    fn insert(&mut self, id: ProxyId, aabb: AABB) {
        if self.aabbs.len() <= id.idx() {
            self.aabbs.resize(id.idx() + 1, None);
        }
        self.aabbs[id.idx()] = Some(aabb);
        self.regions.assign(id, &aabb);
    }

    fn update(&mut self, id: ProxyId, aabb: AABB) {
        match self.aabbs.get_mut(id.idx()) {
            Some(slot) if slot.is_some() => *slot = Some(aabb),
            _ => return,
        }
        self.regions.assign(id, &aabb);
    }

    fn remove(&mut self, id: ProxyId) {
        if let Some(slot) = self.aabbs.get_mut(id.idx()) {
            *slot = None;
        }
        self.regions.unassign(id);
        self.pairs.remove_all_with(id);
    }

    fn step(&mut self, delta: &mut PairDelta<ProxyId>) {
        let _span = tracy_span!("region grid step", "step");
        let cells = self.regions.cells();
        let mut overlapping = cells::find_pairs(self.regions.membership(), &self.aabbs, &cells);

        // detection is off for proxies outside every region,
        // but pairs they already had stay until they actually separate
        let mut carried = 0;
        for pair in self.pairs.iter() {
            if overlapping.contains(&pair) {
                continue;
            }
            let detached = !self.regions.is_in_any(pair.lo()) || !self.regions.is_in_any(pair.hi());
            let boxes = (
                self.aabbs.get(pair.lo().idx()).copied().flatten(),
                self.aabbs.get(pair.hi().idx()).copied().flatten(),
            );
            if let (true, (Some(a), Some(b))) = (detached, boxes) {
                if a.intersects(&b) {
                    overlapping.insert(pair);
                    carried += 1;
                }
            }
        }

        self.pairs.replace(overlapping);
        self.pairs.drain(delta);
        log::trace!(
            "region grid: {} regions, {} overlapping pairs ({} kept out of bounds)",
            cells.len(),
            self.pairs.len(),
            carried
        );
    }

    fn requires_explicit_regions(&self) -> bool {
        true
    }

    fn is_in_bounds(&self, id: ProxyId) -> bool {
        self.regions.is_in_any(id)
    }

    fn max_regions(&self) -> usize {
        self.regions.max_regions()
    }

    fn add_region(
        &mut self,
        bounds: AABB,
        user_data: u64,
        populate: bool,
    ) -> Result<RegionHandle, BroadPhaseError> {
        if bounds.is_valid() && !self.world_bounds.contains(&bounds) {
            return Err(BroadPhaseError::InvalidGeometry(
                "region must lie inside the world bounds",
            ));
        }
        self.regions
            .add(bounds, user_data, populate.then_some(self.aabbs.as_slice()))
    }

    fn remove_region(&mut self, region: RegionHandle) -> Result<Vec<ProxyId>, BroadPhaseError> {
        self.regions.remove(region)
    }

    fn regions(&self) -> Vec<RegionInfo> {
        self.regions.info()
    }

    fn regions_of(&self, id: ProxyId) -> Vec<RegionHandle> {
        self.regions.regions_of(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{broadphase::pairs::Pair, math::Vec3};

    fn cube(x: f64, z: f64, half: f64) -> AABB {
        AABB::from_center_extents(Vec3::new(x, 0.0, z), Vec3::broadcast(half))
    }

    fn world() -> AABB {
        AABB::new(Vec3::broadcast(-100.0), Vec3::broadcast(100.0))
    }

    fn step(grid: &mut RegionGrid) -> PairDelta<ProxyId> {
        let mut delta = PairDelta::default();
        grid.step(&mut delta);
        delta
    }

    #[test]
    fn regions_must_be_in_world() {
        let mut grid = RegionGrid::new(world(), 8);
        assert!(matches!(
            grid.add_region(cube(99.0, 0.0, 5.0), 0, false),
            Err(BroadPhaseError::InvalidGeometry(_))
        ));
        assert!(grid.add_region(cube(0.0, 0.0, 5.0), 0, false).is_ok());
    }

    #[test]
    fn out_of_bounds_keeps_existing_pairs() {
        let mut grid = RegionGrid::new(world(), 8);
        grid.add_region(cube(0.0, 0.0, 10.0), 0, false).unwrap();
        grid.insert(ProxyId(0), cube(9.5, 0.0, 1.0));
        grid.insert(ProxyId(1), cube(10.5, 0.0, 1.0));
        itertools::assert_equal(step(&mut grid).found, [Pair::new(ProxyId(0), ProxyId(1))]);

        // 1 leaves the region while still touching 0
        grid.update(ProxyId(1), cube(11.2, 0.0, 1.0));
        assert!(!grid.is_in_bounds(ProxyId(1)));
        let d = step(&mut grid);
        assert!(d.found.is_empty() && d.lost.is_empty());

        // and then separates
        grid.update(ProxyId(1), cube(30.0, 0.0, 1.0));
        itertools::assert_equal(step(&mut grid).lost, [Pair::new(ProxyId(0), ProxyId(1))]);

        // new pairs are not detected out of bounds
        grid.insert(ProxyId(2), cube(30.5, 0.0, 1.0));
        assert!(step(&mut grid).found.is_empty());
    }

    #[test]
    fn pairs_need_a_shared_region() {
        let mut grid = RegionGrid::new(world(), 8);
        let a = grid.add_region(cube(-10.0, 0.0, 10.0), 0, false).unwrap();
        let b = grid.add_region(cube(10.0, 0.0, 10.0), 1, false).unwrap();
        // both straddle the shared boundary at x = 0
        grid.insert(ProxyId(0), cube(-0.5, 0.0, 1.0));
        grid.insert(ProxyId(1), cube(0.5, 0.0, 1.0));
        assert_eq!(grid.regions_of(ProxyId(0)), vec![a, b]);
        assert_eq!(step(&mut grid).found.len(), 1);

        // removing one region leaves them both in the other
        assert_eq!(grid.remove_region(a).unwrap().len(), 2);
        assert_eq!(grid.regions_of(ProxyId(1)), vec![b]);
        let d = step(&mut grid);
        assert!(d.found.is_empty() && d.lost.is_empty());

        grid.remove_region(b).unwrap();
        assert!(!grid.is_in_bounds(ProxyId(0)));
    }
}
