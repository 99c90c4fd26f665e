//! Self-tuning grid spatial index.
//!
//! Uses the same per-cell pair search as the region grid, but the cells are
//! a uniform grid over the plane perpendicular to the up axis whose extent
//! and resolution are derived from the tracked boxes themselves.
//! The grid is rebuilt whenever the population has grown or shrunk a lot
//! or too many boxes have wandered outside it.
//!
//! Boxes outside the grid are clamped into the border cells instead of being
//! dropped, so this index never has anything out of bounds. Clamping keeps
//! cell ranges monotonic, which guarantees that overlapping boxes always
//! share at least one cell.

use super::{
    aabb::AABB,
    cells::{self, CellMembership},
    pairs::{PairDelta, PairTracker},
    spatial_index::{ProxyId, SpatialIndex},
};
use crate::math::Axis;

/// Parameters for the self-tuning grid.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub struct AutoGridParams {
    /// Average number of objects per cell the grid aims for when it retunes.
    ///
    /// Smaller values mean more cells, fewer pointless tests inside each cell
    /// and more bookkeeping for objects that span several cells.
    pub target_objects_per_cell: usize,
    /// Upper limit for the number of cells along each of the two grid axes.
    pub max_cells_per_axis: usize,
    /// How much to pad the population bounds when retuning,
    /// as a fraction of their largest extent. Some padding keeps objects
    /// moving around the edges from triggering another retune right away.
    pub padding: f64,
}

impl Default for AutoGridParams {
    fn default() -> Self {
        Self {
            target_objects_per_cell: 16,
            max_cells_per_axis: 64,
            padding: 0.1,
        }
    }
}

// [first_u, last_u, first_v, last_v], inclusive
type CellRange = [usize; 4];

#[derive(Clone, Copy, Debug)]
struct Layout {
    bounds: AABB,
    axes: [Axis; 2],
    dims: [usize; 2],
    cell_size: [f64; 2],
}

impl Layout {
    fn new(bounds: AABB, up_axis: Axis, cells_per_axis: usize) -> Self {
        let (u, v) = up_axis.plane();
        let axes = [u, v];
        let dims = [cells_per_axis; 2];
        // flat populations would otherwise divide by zero
        let cell_size = [0, 1].map(|k| (bounds.extent(axes[k]) / dims[k] as f64).max(f64::EPSILON));
        Self {
            bounds,
            axes,
            dims,
            cell_size,
        }
    }

    #[inline]
    fn coord(&self, k: usize, value: f64) -> usize {
        let rel = (value - self.axes[k].of(self.bounds.min)) / self.cell_size[k];
        // float to int casts saturate, negative values become 0
        (rel.floor() as usize).min(self.dims[k] - 1)
    }

    fn cell_range(&self, aabb: &AABB) -> CellRange {
        let [u, v] = self.axes;
        [
            self.coord(0, u.of(aabb.min)),
            self.coord(0, u.of(aabb.max)),
            self.coord(1, v.of(aabb.min)),
            self.coord(1, v.of(aabb.max)),
        ]
    }

    #[inline]
    fn cell_count(&self) -> usize {
        self.dims[0] * self.dims[1]
    }

    fn cells(&self, range: CellRange) -> impl Iterator<Item = usize> {
        let row_len = self.dims[1];
        let [u0, u1, v0, v1] = range;
        (u0..=u1).flat_map(move |u| (v0..=v1).map(move |v| u * row_len + v))
    }
}

#[derive(Debug)]
pub(crate) struct AutoGrid {
    params: AutoGridParams,
    up_axis: Axis,
    aabbs: Vec<Option<AABB>>,
    ranges: Vec<Option<CellRange>>,
    live: usize,
    layout: Option<Layout>,
    membership: CellMembership,
    pairs: PairTracker<ProxyId>,
    // population when the layout was last built
    tuned_for: usize,
    // inserts and updates that landed outside the layout since then
    escaped: usize,
}

impl AutoGrid {
    pub fn new(params: AutoGridParams, up_axis: Axis) -> Self {
        Self {
            params,
            up_axis,
            aabbs: Vec::new(),
            ranges: Vec::new(),
            live: 0,
            layout: None,
            membership: CellMembership::new(1, 0),
            pairs: PairTracker::new(),
            tuned_for: 0,
            escaped: 0,
        }
    }

    fn place(&mut self, id: ProxyId, aabb: &AABB) {
        let Some(layout) = self.layout else {
            return;
        };
        if !layout.bounds.contains(aabb) {
            self.escaped += 1;
        }
        let range = layout.cell_range(aabb);
        if self.ranges[id.idx()] == Some(range) {
            return;
        }
        self.unplace(id);
        for cell in layout.cells(range) {
            self.membership.insert(cell, id);
        }
        self.ranges[id.idx()] = Some(range);
    }

    fn unplace(&mut self, id: ProxyId) {
        let (Some(layout), Some(range)) = (self.layout, self.ranges[id.idx()].take()) else {
            return;
        };
        for cell in layout.cells(range) {
            self.membership.remove(cell, id);
        }
    }

    fn needs_retune(&self) -> bool {
        if self.layout.is_none() {
            return self.live > 0;
        }
        let target = self.params.target_objects_per_cell.max(1);
        let grown = self.live > 2 * self.tuned_for.max(target);
        let shrunk = self.tuned_for > target && 2 * self.live < self.tuned_for;
        let escaped = self.escaped > self.live / 4 + target;
        grown || shrunk || escaped
    }

    fn retune(&mut self) {
        let _span = tracy_span!("auto grid retune", "retune");
        let Some(bounds) = self.aabbs.iter().flatten().copied().reduce(|a, b| a.union(&b)) else {
            self.layout = None;
            return;
        };
        let largest_extent = Axis::ALL
            .iter()
            .map(|&a| bounds.extent(a))
            .fold(0.0, f64::max);
        let bounds = bounds.padded(largest_extent * self.params.padding);

        let target = self.params.target_objects_per_cell.max(1);
        let wanted_cells = (self.live / target).max(1);
        let cells_per_axis = ((wanted_cells as f64).sqrt().ceil() as usize)
            .clamp(1, self.params.max_cells_per_axis.max(1));

        let layout = Layout::new(bounds, self.up_axis, cells_per_axis);
        self.membership.reset(layout.cell_count());
        self.ranges.iter_mut().for_each(|r| *r = None);
        self.layout = Some(layout);
        for idx in 0..self.aabbs.len() {
            if let Some(aabb) = self.aabbs[idx] {
                self.place(ProxyId(idx as u32), &aabb);
            }
        }
        self.tuned_for = self.live;
        self.escaped = 0;
        log::debug!(
            "auto grid retuned to {0}x{0} cells for {1} objects",
            cells_per_axis,
            self.live
        );
    }
}

impl SpatialIndex for AutoGrid {
    fn insert(&mut self, id: ProxyId, aabb: AABB) {
        if self.aabbs.len() <= id.idx() {
            self.aabbs.resize(id.idx() + 1, None);
            self.ranges.resize(id.idx() + 1, None);
        }
        if self.aabbs[id.idx()].replace(aabb).is_none() {
            self.live += 1;
        }
        self.place(id, &aabb);
    }

    fn update(&mut self, id: ProxyId, aabb: AABB) {
        match self.aabbs.get_mut(id.idx()) {
            Some(slot) if slot.is_some() => *slot = Some(aabb),
            _ => return,
        }
        self.place(id, &aabb);
    }

    fn remove(&mut self, id: ProxyId) {
        if self
            .aabbs
            .get_mut(id.idx())
            .and_then(Option::take)
            .is_none()
        {
            return;
        }
        self.live -= 1;
        self.unplace(id);
        self.pairs.remove_all_with(id);
    }

    fn step(&mut self, delta: &mut PairDelta<ProxyId>) {
        let _span = tracy_span!("auto grid step", "step");
        if self.needs_retune() {
            self.retune();
        }
        let cells: Vec<usize> = (0..self.membership.cell_count())
            .filter(|&cell| self.membership.member_count(cell) > 1)
            .collect();
        let overlapping = cells::find_pairs(&self.membership, &self.aabbs, &cells);
        self.pairs.replace(overlapping);
        self.pairs.drain(delta);
        log::trace!(
            "auto grid: {} objects, {} busy cells, {} overlapping pairs",
            self.live,
            cells.len(),
            self.pairs.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{broadphase::pairs::Pair, math::Vec3};

    fn cube(x: f64, z: f64, half: f64) -> AABB {
        AABB::from_center_extents(Vec3::new(x, 0.0, z), Vec3::broadcast(half))
    }

    fn step(grid: &mut AutoGrid) -> PairDelta<ProxyId> {
        let mut delta = PairDelta::default();
        grid.step(&mut delta);
        delta
    }

    fn small_cells() -> AutoGridParams {
        AutoGridParams {
            target_objects_per_cell: 1,
            ..Default::default()
        }
    }

    #[test]
    fn clamped_cells_are_monotonic() {
        let layout = Layout::new(
            AABB::new(Vec3::zero(), Vec3::new(10.0, 1.0, 10.0)),
            Axis::Y,
            5,
        );
        assert_eq!(layout.coord(0, -100.0), 0);
        assert_eq!(layout.coord(0, 0.0), 0);
        assert_eq!(layout.coord(0, 2.0), 1);
        assert_eq!(layout.coord(0, 9.99), 4);
        assert_eq!(layout.coord(0, 1e300), 4);
        itertools::assert_equal(layout.cells([1, 2, 3, 3]), [8, 13]);
    }

    #[test]
    fn flat_population() {
        let mut grid = AutoGrid::new(small_cells(), Axis::Y);
        for i in 0..4 {
            grid.insert(ProxyId(i), AABB::zero());
        }
        assert_eq!(step(&mut grid).found.len(), 6);
    }

    #[test]
    fn retunes_and_stays_correct() {
        let mut grid = AutoGrid::new(small_cells(), Axis::Y);
        grid.insert(ProxyId(0), cube(0.0, 0.0, 1.0));
        grid.insert(ProxyId(1), cube(1.5, 0.0, 1.0));
        itertools::assert_equal(step(&mut grid).found, [Pair::new(ProxyId(0), ProxyId(1))]);
        assert_eq!(grid.tuned_for, 2);

        // lots of far away objects in a line, only the last two touch
        for i in 2..40 {
            grid.insert(ProxyId(i), cube(100.0 + 3.0 * i as f64, 0.0, 1.0));
        }
        grid.insert(ProxyId(40), cube(100.0 + 3.0 * 39.0 + 2.0, 0.0, 1.0));
        let d = step(&mut grid);
        assert_eq!(grid.tuned_for, 41);
        itertools::assert_equal(d.found, [Pair::new(ProxyId(39), ProxyId(40))]);

        // moving way outside the grid still finds pairs via border cells
        grid.update(ProxyId(0), cube(-1000.0, -1000.0, 1.0));
        grid.update(ProxyId(1), cube(-1001.0, -1000.5, 1.0));
        let d = step(&mut grid);
        assert!(d.found.is_empty() && d.lost.is_empty());
        grid.update(ProxyId(1), cube(-1010.0, -1000.5, 1.0));
        itertools::assert_equal(step(&mut grid).lost, [Pair::new(ProxyId(0), ProxyId(1))]);
    }
}
