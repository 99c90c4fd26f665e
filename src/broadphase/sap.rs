//! Incremental sweep and prune.
//!
//! Every box has a min and max endpoint in a sorted list per axis.
//! When a box moves, its endpoints are moved to their new places with
//! insertion sort, and each time an endpoint passes over another box's
//! endpoint of the opposite kind, the overlap of those two boxes along that
//! axis begins or ends. This makes updates very cheap when objects move
//! a little at a time, but bulk insertion and lots of movement cost a lot
//! of swapping.

use super::{
    aabb::AABB,
    pairs::{Pair, PairDelta, PairTracker},
    spatial_index::{ProxyId, SpatialIndex},
};
use crate::math::Axis;

#[derive(Clone, Copy, Debug)]
struct Endpoint {
    value: f64,
    proxy: ProxyId,
    is_max: bool,
}

impl Endpoint {
    /// Sort order along an axis. Minimums go before maximums at equal values
    /// so that boxes touching at a face count as overlapping.
    #[inline]
    fn precedes(&self, other: &Endpoint) -> bool {
        (self.value, self.is_max, self.proxy) < (other.value, other.is_max, other.proxy)
    }
}

#[derive(Clone, Copy, Debug)]
struct SapBox {
    aabb: AABB,
    // positions of the [min, max] endpoints in each axis list
    ends: [[usize; 2]; 3],
}

#[derive(Debug, Default)]
pub(crate) struct SweepAndPrune {
    axes: [Vec<Endpoint>; 3],
    boxes: Vec<Option<SapBox>>,
    pairs: PairTracker<ProxyId>,
}

impl SweepAndPrune {
    pub fn new() -> Self {
        Self::default()
    }

    fn sweep(&mut self, axis: usize) -> AxisSweep<'_> {
        AxisSweep {
            list: &mut self.axes[axis],
            boxes: &mut self.boxes,
            pairs: &mut self.pairs,
            axis,
        }
    }

    #[inline]
    fn end_pos(&self, id: ProxyId, axis: usize, is_max: bool) -> Option<usize> {
        self.boxes[id.idx()]
            .as_ref()
            .map(|b| b.ends[axis][is_max as usize])
    }
}

impl SpatialIndex for SweepAndPrune {
    fn insert(&mut self, id: ProxyId, aabb: AABB) {
        if self.boxes.len() <= id.idx() {
            self.boxes.resize(id.idx() + 1, None);
        }
        self.boxes[id.idx()] = Some(SapBox {
            aabb,
            ends: [[0; 2]; 3],
        });

        // append both endpoints at the far end and let them sink into place,
        // which adds pairs the same way as a box moving in from infinity
        for axis in Axis::ALL {
            let a = axis.index();
            for is_max in [false, true] {
                let value = axis.of(if is_max { aabb.max } else { aabb.min });
                let mut sweep = self.sweep(a);
                sweep.list.push(Endpoint {
                    value,
                    proxy: id,
                    is_max,
                });
                let pos = sweep.list.len() - 1;
                sweep.set_pos(pos);
                sweep.sift_left(pos);
            }
        }
    }

    fn update(&mut self, id: ProxyId, aabb: AABB) {
        match self.boxes.get_mut(id.idx()) {
            Some(Some(b)) => b.aabb = aabb,
            _ => return,
        }

        for axis in Axis::ALL {
            let a = axis.index();
            // set both values before moving anything so the box is consistent
            // for the overlap checks done while sorting
            for (is_max, value) in [(false, axis.of(aabb.min)), (true, axis.of(aabb.max))] {
                if let Some(pos) = self.end_pos(id, a, is_max) {
                    self.axes[a][pos].value = value;
                }
            }
            // this order keeps the box's own endpoints from passing each other
            // whichever way it moved or changed size
            for (is_max, leftward) in [(false, true), (true, false), (false, false), (true, true)] {
                let Some(pos) = self.end_pos(id, a, is_max) else {
                    return;
                };
                let mut sweep = self.sweep(a);
                if leftward {
                    sweep.sift_left(pos);
                } else {
                    sweep.sift_right(pos);
                }
            }
        }
    }

    fn remove(&mut self, id: ProxyId) {
        let Some(removed) = self.boxes.get_mut(id.idx()).and_then(Option::take) else {
            return;
        };
        for a in 0..3 {
            let [min_pos, max_pos] = removed.ends[a];
            let list = &mut self.axes[a];
            // max is always after min, remove it first to keep min_pos valid
            list.remove(max_pos);
            list.remove(min_pos);
            for (pos, end) in list.iter().enumerate().skip(min_pos) {
                if let Some(b) = &mut self.boxes[end.proxy.idx()] {
                    b.ends[a][end.is_max as usize] = pos;
                }
            }
        }
        self.pairs.remove_all_with(id);
    }

    fn step(&mut self, delta: &mut PairDelta<ProxyId>) {
        let _span = tracy_span!("sweep and prune step", "step");
        self.pairs.drain(delta);
        log::trace!(
            "sweep and prune: {} boxes, {} overlapping pairs",
            self.axes[0].len() / 2,
            self.pairs.len()
        );
    }
}

/// Borrows of everything needed to sort one axis list.
struct AxisSweep<'a> {
    list: &'a mut Vec<Endpoint>,
    boxes: &'a mut [Option<SapBox>],
    pairs: &'a mut PairTracker<ProxyId>,
    axis: usize,
}

impl<'a> AxisSweep<'a> {
    #[inline]
    fn set_pos(&mut self, pos: usize) {
        let end = self.list[pos];
        if let Some(b) = &mut self.boxes[end.proxy.idx()] {
            b.ends[self.axis][end.is_max as usize] = pos;
        }
    }

    #[inline]
    fn swap(&mut self, i: usize, j: usize) {
        self.list.swap(i, j);
        self.set_pos(i);
        self.set_pos(j);
    }

    fn sift_left(&mut self, mut pos: usize) {
        while pos > 0 && self.list[pos].precedes(&self.list[pos - 1]) {
            self.crossed(self.list[pos], self.list[pos - 1], true);
            self.swap(pos, pos - 1);
            pos -= 1;
        }
    }

    fn sift_right(&mut self, mut pos: usize) {
        while pos + 1 < self.list.len() && self.list[pos + 1].precedes(&self.list[pos]) {
            self.crossed(self.list[pos], self.list[pos + 1], false);
            self.swap(pos, pos + 1);
            pos += 1;
        }
    }

    /// Handle the `moving` endpoint passing over `passed`.
    fn crossed(&mut self, moving: Endpoint, passed: Endpoint, leftward: bool) {
        if moving.proxy == passed.proxy || moving.is_max == passed.is_max {
            return;
        }
        let pair = Pair::new(moving.proxy, passed.proxy);
        // a min moving left or a max moving right over the other kind of
        // endpoint starts an overlap along this axis, otherwise one ends
        let starts = moving.is_max != leftward;
        if starts {
            let both = (
                &self.boxes[moving.proxy.idx()],
                &self.boxes[passed.proxy.idx()],
            );
            if let (Some(a), Some(b)) = both {
                if a.aabb.intersects(&b.aabb) {
                    self.pairs.add(pair);
                }
            }
        } else {
            self.pairs.remove(pair);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;

    fn cube(x: f64, y: f64, z: f64, half: f64) -> AABB {
        AABB::from_center_extents(Vec3::new(x, y, z), Vec3::broadcast(half))
    }

    fn step(sap: &mut SweepAndPrune) -> PairDelta<ProxyId> {
        let mut delta = PairDelta::default();
        sap.step(&mut delta);
        delta
    }

    fn pair(a: u32, b: u32) -> Pair<ProxyId> {
        Pair::new(ProxyId(a), ProxyId(b))
    }

    fn assert_sorted(sap: &SweepAndPrune) {
        for (a, list) in sap.axes.iter().enumerate() {
            for w in list.windows(2) {
                assert!(w[0].precedes(&w[1]));
            }
            for (pos, end) in list.iter().enumerate() {
                let b = sap.boxes[end.proxy.idx()].unwrap();
                assert_eq!(b.ends[a][end.is_max as usize], pos);
            }
        }
    }

    #[test]
    fn insert_move_remove() {
        let mut sap = SweepAndPrune::new();
        sap.insert(ProxyId(0), cube(0.0, 0.0, 0.0, 1.0));
        sap.insert(ProxyId(1), cube(1.5, 0.0, 0.0, 1.0));
        sap.insert(ProxyId(2), cube(10.0, 0.0, 0.0, 1.0));
        assert_sorted(&sap);
        let d = step(&mut sap);
        itertools::assert_equal(d.found, [pair(0, 1)]);

        // 2 moves over 1 to the other side of 0, touching 0 at exactly x = -1
        sap.update(ProxyId(2), cube(-2.0, 0.0, 0.0, 1.0));
        assert_sorted(&sap);
        let d = step(&mut sap);
        itertools::assert_equal(d.found, [pair(0, 2)]);
        assert!(d.lost.is_empty());

        // separate along y only
        sap.update(ProxyId(1), cube(1.5, 5.0, 0.0, 1.0));
        assert_sorted(&sap);
        let d = step(&mut sap);
        itertools::assert_equal(d.lost, [pair(0, 1)]);

        sap.remove(ProxyId(0));
        assert_sorted(&sap);
        let d = step(&mut sap);
        itertools::assert_equal(d.lost, [pair(0, 2)]);
        assert_eq!(sap.axes[0].len(), 4);
    }

    #[test]
    fn shrink_and_grow() {
        let mut sap = SweepAndPrune::new();
        sap.insert(ProxyId(0), cube(0.0, 0.0, 0.0, 5.0));
        sap.insert(ProxyId(1), cube(3.0, 3.0, 3.0, 0.5));
        itertools::assert_equal(step(&mut sap).found, [pair(0, 1)]);

        sap.update(ProxyId(0), cube(0.0, 0.0, 0.0, 1.0));
        assert_sorted(&sap);
        itertools::assert_equal(step(&mut sap).lost, [pair(0, 1)]);

        sap.update(ProxyId(0), cube(0.0, 0.0, 0.0, 10.0));
        assert_sorted(&sap);
        itertools::assert_equal(step(&mut sap).found, [pair(0, 1)]);
    }

    #[test]
    fn moved_away_and_back_within_step() {
        let mut sap = SweepAndPrune::new();
        sap.insert(ProxyId(0), cube(0.0, 0.0, 0.0, 1.0));
        sap.insert(ProxyId(1), cube(1.0, 0.0, 0.0, 1.0));
        step(&mut sap);
        sap.update(ProxyId(1), cube(50.0, 0.0, 0.0, 1.0));
        sap.update(ProxyId(1), cube(1.0, 0.0, 0.0, 1.0));
        let d = step(&mut sap);
        assert!(d.found.is_empty() && d.lost.is_empty());
    }
}
