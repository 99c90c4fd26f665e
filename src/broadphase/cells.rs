//! Cell-based pair finding shared by the gridded strategies.
//!
//! Proxies are binned into cells (explicit regions or automatic grid cells),
//! and pairs are only tested between proxies that share a cell.
//! Cells are independent of each other, so with the `parallel` feature
//! they are pruned on the rayon thread pool.

use std::collections::HashSet;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::{
    aabb::AABB,
    bitmatrix::{BitMatrix, BitMatrixParams},
    pairs::Pair,
    spatial_index::{ProxyId, ProxyPair},
};

/// Which proxies are in which cells.
#[derive(Clone, Debug)]
pub(crate) struct CellMembership {
    cells: BitMatrix,
    // how many cells each proxy is in
    counts: Vec<u32>,
}

impl CellMembership {
    pub fn new(cell_count: usize, initial_capacity: usize) -> Self {
        Self {
            cells: BitMatrix::new(BitMatrixParams {
                bits_per_entry: initial_capacity,
                entry_count: cell_count,
            }),
            counts: vec![0; initial_capacity],
        }
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        self.cells.entry_count()
    }

    /// Remove everything and change the number of cells.
    pub fn reset(&mut self, cell_count: usize) {
        self.cells.clear_and_reshape(cell_count);
        self.counts.iter_mut().for_each(|c| *c = 0);
    }

    pub fn insert(&mut self, cell: usize, id: ProxyId) {
        if self.counts.len() <= id.idx() {
            self.counts.resize(id.idx() + 1, 0);
            self.cells.reserve_bits(id.idx() + 1);
        }
        if !self.cells.entry(cell).has(id.idx()) {
            self.cells.entry_mut(cell).set(id.idx());
            self.counts[id.idx()] += 1;
        }
    }

    pub fn remove(&mut self, cell: usize, id: ProxyId) {
        if self.cells.entry(cell).has(id.idx()) {
            self.cells.entry_mut(cell).unset(id.idx());
            self.counts[id.idx()] -= 1;
        }
    }

    /// Remove the proxy from every cell. Linear in the number of cells.
    pub fn remove_from_all(&mut self, id: ProxyId) {
        if self.count(id) == 0 {
            return;
        }
        for cell in 0..self.cell_count() {
            self.cells.entry_mut(cell).unset(id.idx());
        }
        self.counts[id.idx()] = 0;
    }

    /// Empty a cell, returning the proxies that were in it.
    pub fn clear_cell(&mut self, cell: usize) -> Vec<ProxyId> {
        let members: Vec<ProxyId> = self.members(cell).collect();
        for id in &members {
            self.counts[id.idx()] -= 1;
        }
        self.cells.entry_mut(cell).clear();
        members
    }

    /// Number of cells the proxy is in.
    #[inline]
    pub fn count(&self, id: ProxyId) -> u32 {
        self.counts.get(id.idx()).copied().unwrap_or(0)
    }

    #[inline]
    pub fn contains(&self, cell: usize, id: ProxyId) -> bool {
        self.cells.entry(cell).has(id.idx())
    }

    pub fn members(&self, cell: usize) -> impl '_ + Iterator<Item = ProxyId> {
        self.cells.entry(cell).iter().map(|idx| ProxyId(idx as u32))
    }

    pub fn member_count(&self, cell: usize) -> usize {
        self.cells.entry(cell).count()
    }
}

/// Find every overlapping pair of proxies that share at least one of `cells`.
pub(crate) fn find_pairs(
    membership: &CellMembership,
    aabbs: &[Option<AABB>],
    cells: &[usize],
) -> HashSet<ProxyPair> {
    let _span = tracy_span!("cell pair search", "find_pairs");

    #[cfg(feature = "parallel")]
    let per_cell: Vec<Vec<ProxyPair>> = cells
        .par_iter()
        .map(|&cell| prune_cell(membership, aabbs, cell))
        .collect();
    #[cfg(not(feature = "parallel"))]
    let per_cell: Vec<Vec<ProxyPair>> = cells
        .iter()
        .map(|&cell| prune_cell(membership, aabbs, cell))
        .collect();

    per_cell.into_iter().flatten().collect()
}

/// Sort the cell's members along x and sweep to find overlaps.
fn prune_cell(membership: &CellMembership, aabbs: &[Option<AABB>], cell: usize) -> Vec<ProxyPair> {
    let mut members: Vec<(ProxyId, AABB)> = membership
        .members(cell)
        .filter_map(|id| aabbs.get(id.idx()).copied().flatten().map(|aabb| (id, aabb)))
        .collect();
    let mut pairs = Vec::new();
    prune_sorted(&mut members, |a, b| pairs.push(Pair::new(a, b)));
    pairs
}

/// One-axis box pruning over a small set of boxes, calling `on_pair` for
/// every overlapping pair.
pub(crate) fn prune_sorted<K: Copy>(boxes: &mut [(K, AABB)], mut on_pair: impl FnMut(K, K)) {
    boxes.sort_unstable_by(|(_, a), (_, b)| a.min.x.total_cmp(&b.min.x));
    for (i, (key_a, a)) in boxes.iter().enumerate() {
        for (key_b, b) in &boxes[i + 1..] {
            if b.min.x > a.max.x {
                break;
            }
            if a.intersects(b) {
                on_pair(*key_a, *key_b);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;

    fn cube(x: f64, half: f64) -> AABB {
        AABB::from_center_extents(Vec3::new(x, 0.0, 0.0), Vec3::broadcast(half))
    }

    #[test]
    fn membership_counts() {
        let mut m = CellMembership::new(3, 0);
        m.insert(0, ProxyId(200));
        m.insert(1, ProxyId(200));
        m.insert(1, ProxyId(200));
        m.insert(2, ProxyId(1));
        assert_eq!(m.count(ProxyId(200)), 2);
        m.remove(0, ProxyId(200));
        assert_eq!(m.count(ProxyId(200)), 1);
        assert_eq!(m.clear_cell(1), vec![ProxyId(200)]);
        assert_eq!(m.count(ProxyId(200)), 0);
        m.remove_from_all(ProxyId(1));
        assert_eq!(m.member_count(2), 0);
        assert_eq!(m.count(ProxyId(7000)), 0);
    }

    #[test]
    fn pairs_only_within_shared_cells() {
        let mut m = CellMembership::new(2, 4);
        let aabbs = vec![
            Some(cube(0.0, 1.0)),
            Some(cube(1.5, 1.0)),
            Some(cube(3.0, 1.0)),
            None,
        ];
        // 1 and 2 overlap but never share a cell
        m.insert(0, ProxyId(0));
        m.insert(0, ProxyId(1));
        m.insert(1, ProxyId(2));
        m.insert(1, ProxyId(0));
        // dangling membership without a box is ignored
        m.insert(1, ProxyId(3));
        let pairs = find_pairs(&m, &aabbs, &[0, 1]);
        assert_eq!(pairs.len(), 1);
        assert!(pairs.contains(&Pair::new(ProxyId(0), ProxyId(1))));
    }

    #[test]
    fn prune_matches_brute_force() {
        let mut boxes: Vec<(usize, AABB)> = (0..20)
            .map(|i| (i, cube((i * 7 % 13) as f64 * 0.8, 0.5 + (i % 3) as f64 * 0.3)))
            .collect();
        let mut expected = HashSet::new();
        for (i, a) in &boxes {
            for (j, b) in &boxes {
                if i < j && a.intersects(b) {
                    expected.insert(Pair::new(*i, *j));
                }
            }
        }
        let mut found = HashSet::new();
        prune_sorted(&mut boxes, |a, b| {
            assert!(found.insert(Pair::new(a, b)));
        });
        assert_eq!(found, expected);
    }
}
