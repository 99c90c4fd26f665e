//! Regions partition the world for the region-gridded spatial index.
//!
//! Each live region is a cell of a [`CellMembership`]; the cell index is the
//! region's arena slot, which is always below the region cap because freed
//! slots are reused before new ones are allocated.

use thunderdome as td;

use super::{aabb::AABB, cells::CellMembership, spatial_index::ProxyId};
use crate::{error::BroadPhaseError, math::Axis};

/// Key type to refer to a region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegionHandle(pub(super) td::Index);

impl RegionHandle {
    /// Get the underlying [`thunderdome::Index`][thunderdome::Index] of this key.
    #[inline]
    pub fn index(&self) -> td::Index {
        self.0
    }
}

/// Snapshot of a region's state.
#[derive(Clone, Debug, PartialEq)]
pub struct RegionInfo {
    pub handle: RegionHandle,
    pub bounds: AABB,
    pub user_data: u64,
    /// Number of index entries currently inside the region.
    /// Aggregates count once no matter how many members they have.
    pub object_count: usize,
    /// Whether this region overlaps another one with nonzero volume.
    /// Regions that only touch at their boundary don't count.
    pub overlaps_other: bool,
    /// Whether the region takes part in pair finding and bounds tracking.
    /// Every live region does; a region stops being active only by being removed.
    pub active: bool,
}

#[derive(Clone, Debug)]
struct Region {
    bounds: AABB,
    user_data: u64,
}

#[derive(Clone, Debug)]
pub(crate) struct RegionManager {
    regions: td::Arena<Region>,
    max_regions: usize,
    membership: CellMembership,
}

impl RegionManager {
    pub fn new(max_regions: usize) -> Self {
        Self {
            regions: td::Arena::new(),
            max_regions,
            membership: CellMembership::new(max_regions, 0),
        }
    }

    #[inline]
    pub fn max_regions(&self) -> usize {
        self.max_regions
    }

    /// Add a region. If `populate` is given, every box in it that touches
    /// the region is attached right away, which is linear in the number of
    /// live proxies. Otherwise proxies join when they are next inserted or moved.
    pub fn add(
        &mut self,
        bounds: AABB,
        user_data: u64,
        populate: Option<&[Option<AABB>]>,
    ) -> Result<RegionHandle, BroadPhaseError> {
        if !bounds.is_valid() {
            return Err(BroadPhaseError::InvalidGeometry(
                "region bounds must be finite with min <= max",
            ));
        }
        if self.regions.len() >= self.max_regions {
            return Err(BroadPhaseError::RegionCapExceeded {
                cap: self.max_regions,
            });
        }

        let handle = RegionHandle(self.regions.insert(Region { bounds, user_data }));
        let cell = handle.0.slot() as usize;
        // should already be empty from removal, but stale bits would be very bad
        self.membership.clear_cell(cell);
        if let Some(aabbs) = populate {
            for (idx, aabb) in aabbs.iter().enumerate() {
                if matches!(aabb, Some(aabb) if aabb.intersects(&bounds)) {
                    self.membership.insert(cell, ProxyId(idx as u32));
                }
            }
        }
        log::debug!(
            "added region {:?} ({} members)",
            handle,
            self.membership.member_count(cell)
        );
        Ok(handle)
    }

    /// Remove a region, returning the proxies that were in it.
    pub fn remove(&mut self, handle: RegionHandle) -> Result<Vec<ProxyId>, BroadPhaseError> {
        self.regions
            .remove(handle.0)
            .ok_or(BroadPhaseError::StaleRegion(handle))?;
        let members = self.membership.clear_cell(handle.0.slot() as usize);
        log::debug!("removed region {:?} ({} members)", handle, members.len());
        Ok(members)
    }

    /// Recompute which regions a proxy belongs to.
    pub fn assign(&mut self, id: ProxyId, aabb: &AABB) {
        for (idx, region) in self.regions.iter() {
            let cell = idx.slot() as usize;
            if region.bounds.intersects(aabb) {
                self.membership.insert(cell, id);
            } else {
                self.membership.remove(cell, id);
            }
        }
    }

    pub fn unassign(&mut self, id: ProxyId) {
        self.membership.remove_from_all(id);
    }

    #[inline]
    pub fn is_in_any(&self, id: ProxyId) -> bool {
        self.membership.count(id) > 0
    }

    #[inline]
    pub fn membership(&self) -> &CellMembership {
        &self.membership
    }

    /// Cells of all live regions.
    pub fn cells(&self) -> Vec<usize> {
        self.regions
            .iter()
            .map(|(idx, _)| idx.slot() as usize)
            .collect()
    }

    /// Regions containing the proxy, lowest slot first.
    ///
    /// A proxy on the shared boundary of two touching regions is in both,
    /// and the first one here is considered its primary region.
    pub fn regions_of(&self, id: ProxyId) -> Vec<RegionHandle> {
        let mut handles: Vec<RegionHandle> = self
            .regions
            .iter()
            .filter(|(idx, _)| self.membership.contains(idx.slot() as usize, id))
            .map(|(idx, _)| RegionHandle(idx))
            .collect();
        handles.sort_by_key(|h| h.0.slot());
        handles
    }

    pub fn info(&self) -> Vec<RegionInfo> {
        let mut infos: Vec<RegionInfo> = self
            .regions
            .iter()
            .map(|(idx, region)| RegionInfo {
                handle: RegionHandle(idx),
                bounds: region.bounds,
                user_data: region.user_data,
                object_count: self.membership.member_count(idx.slot() as usize),
                overlaps_other: self.regions.iter().any(|(other_idx, other)| {
                    other_idx != idx && other.bounds.overlaps_with_volume(&region.bounds)
                }),
                active: true,
            })
            .collect();
        infos.sort_by_key(|info| info.handle.0.slot());
        infos
    }
}

/// Split world bounds into `subdivisions` × `subdivisions` regions
/// tiling the plane perpendicular to `up_axis`.
/// Each region spans the whole world along the up axis.
///
/// Neighboring regions share their boundaries exactly,
/// so they touch but don't overlap.
pub fn regions_from_world_bounds(world: AABB, subdivisions: u32, up_axis: Axis) -> Vec<AABB> {
    let n = subdivisions.max(1);
    let (u, v) = up_axis.plane();
    let u_step = world.extent(u) / n as f64;
    let v_step = world.extent(v) / n as f64;
    // compute edges from indices instead of accumulating steps so that
    // neighbors share bit-identical boundaries and the last edge is exact
    let edge = |axis: Axis, step: f64, i: u32| {
        if i == n {
            axis.of(world.max)
        } else {
            axis.of(world.min) + step * i as f64
        }
    };

    let mut regions = Vec::with_capacity((n * n) as usize);
    for i in 0..n {
        for j in 0..n {
            let mut aabb = world;
            u.set(&mut aabb.min, edge(u, u_step, i));
            u.set(&mut aabb.max, edge(u, u_step, i + 1));
            v.set(&mut aabb.min, edge(v, v_step, j));
            v.set(&mut aabb.max, edge(v, v_step, j + 1));
            regions.push(aabb);
        }
    }
    regions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;

    fn flat(min: [f64; 2], max: [f64; 2]) -> AABB {
        AABB::new(
            Vec3::new(min[0], 0.0, min[1]),
            Vec3::new(max[0], 10.0, max[1]),
        )
    }

    #[test]
    fn cap_and_slot_reuse() {
        let mut rm = RegionManager::new(2);
        let a = rm.add(flat([0.0, 0.0], [1.0, 1.0]), 0, None).unwrap();
        let _b = rm.add(flat([1.0, 0.0], [2.0, 1.0]), 1, None).unwrap();
        assert_eq!(
            rm.add(flat([2.0, 0.0], [3.0, 1.0]), 2, None),
            Err(BroadPhaseError::RegionCapExceeded { cap: 2 })
        );
        rm.remove(a).unwrap();
        assert_eq!(rm.remove(a), Err(BroadPhaseError::StaleRegion(a)));
        let c = rm.add(flat([2.0, 0.0], [3.0, 1.0]), 2, None).unwrap();
        assert_eq!(c.0.slot(), a.0.slot());
        assert_ne!(c, a);
    }

    #[test]
    fn invalid_bounds_rejected() {
        let mut rm = RegionManager::new(4);
        let inverted = flat([1.0, 0.0], [0.0, 1.0]);
        assert!(matches!(
            rm.add(inverted, 0, None),
            Err(BroadPhaseError::InvalidGeometry(_))
        ));
        assert!(rm.info().is_empty());
    }

    #[test]
    fn touching_regions_and_tie_break() {
        let mut rm = RegionManager::new(4);
        let a = rm.add(flat([0.0, 0.0], [10.0, 10.0]), 0, None).unwrap();
        let b = rm.add(flat([10.0, 0.0], [20.0, 10.0]), 0, None).unwrap();
        assert!(rm.info().iter().all(|info| !info.overlaps_other));

        // straddles exactly the shared edge
        let edge = AABB::new(Vec3::new(10.0, 1.0, 1.0), Vec3::new(10.0, 2.0, 2.0));
        rm.assign(ProxyId(0), &edge);
        assert_eq!(rm.regions_of(ProxyId(0)), vec![a, b]);

        let c = rm.add(flat([5.0, 5.0], [15.0, 15.0]), 0, None).unwrap();
        let infos = rm.info();
        assert!(infos.iter().all(|info| info.overlaps_other));
        // not assigned to c until it moves again
        assert_eq!(infos.iter().find(|i| i.handle == c).unwrap().object_count, 0);
    }

    #[test]
    fn populate_on_add() {
        let aabbs = vec![
            Some(flat([1.0, 1.0], [2.0, 2.0])),
            None,
            Some(flat([50.0, 50.0], [51.0, 51.0])),
        ];
        let mut rm = RegionManager::new(4);
        let r = rm
            .add(flat([0.0, 0.0], [10.0, 10.0]), 0, Some(&aabbs))
            .unwrap();
        assert!(rm.is_in_any(ProxyId(0)));
        assert!(!rm.is_in_any(ProxyId(2)));
        assert_eq!(rm.remove(r).unwrap(), vec![ProxyId(0)]);
        assert!(!rm.is_in_any(ProxyId(0)));
    }

    #[test]
    fn world_subdivision() {
        let world = AABB::new(Vec3::new(-1.0, -5.0, 0.0), Vec3::new(2.0, 5.0, 3.0));
        let regions = regions_from_world_bounds(world, 3, Axis::Y);
        assert_eq!(regions.len(), 9);
        let union = regions.iter().fold(regions[0], |u, r| u.union(r));
        assert_eq!(union, world);
        for (i, a) in regions.iter().enumerate() {
            assert_eq!(a.extent(Axis::Y), 10.0);
            for b in &regions[i + 1..] {
                assert!(!a.overlaps_with_volume(b));
            }
        }
    }
}
