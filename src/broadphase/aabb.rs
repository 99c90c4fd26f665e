use crate::math::{Axis, Vec3};

/// An axis-aligned bounding box.
///
/// Boxes are closed: two boxes that only share a face, edge or corner
/// still intersect according to [`intersects`][Self::intersects].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub struct AABB {
    pub min: Vec3,
    pub max: Vec3,
}

impl AABB {
    #[inline]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn zero() -> Self {
        Self {
            min: Vec3::zero(),
            max: Vec3::zero(),
        }
    }

    pub fn from_center_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Check that all coordinates are finite and `min <= max` on every axis.
    pub fn is_valid(&self) -> bool {
        Axis::ALL.iter().all(|&a| {
            let (lo, hi) = (a.of(self.min), a.of(self.max));
            lo.is_finite() && hi.is_finite() && lo <= hi
        })
    }

    #[inline]
    pub fn extent(&self, axis: Axis) -> f64 {
        axis.of(self.max) - axis.of(self.min)
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Closed intersection test.
    #[inline]
    pub fn intersects(&self, other: &AABB) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
            && self.min.z <= other.max.z
            && other.min.z <= self.max.z
    }

    /// Intersection test that ignores contact with zero volume,
    /// i.e. boxes that only touch at their boundary don't overlap.
    #[inline]
    pub fn overlaps_with_volume(&self, other: &AABB) -> bool {
        self.min.x < other.max.x
            && other.min.x < self.max.x
            && self.min.y < other.max.y
            && other.min.y < self.max.y
            && self.min.z < other.max.z
            && other.min.z < self.max.z
    }

    pub fn intersection(&self, other: &AABB) -> Option<AABB> {
        if !self.intersects(other) {
            return None;
        }
        Some(AABB {
            min: self.min.max_by_component(other.min),
            max: self.max.min_by_component(other.max),
        })
    }

    pub fn union(&self, other: &AABB) -> AABB {
        AABB {
            min: self.min.min_by_component(other.min),
            max: self.max.max_by_component(other.max),
        }
    }

    /// Check if `other` lies entirely inside this box.
    pub fn contains(&self, other: &AABB) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.min.z <= other.min.z
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
            && self.max.z >= other.max.z
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.intersects(&AABB {
            min: point,
            max: point,
        })
    }

    /// Grow the box by `amount` in every direction.
    pub fn padded(&self, amount: f64) -> AABB {
        let pad = Vec3::broadcast(amount);
        AABB {
            min: self.min - pad,
            max: self.max + pad,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(min: [f64; 3], max: [f64; 3]) -> AABB {
        AABB::new(
            Vec3::new(min[0], min[1], min[2]),
            Vec3::new(max[0], max[1], max[2]),
        )
    }

    #[test]
    fn touching_boxes() {
        let a = cube([0.0, 0.0, 0.0], [10.0, 10.0, 10.0]);
        let b = cube([10.0, 0.0, 0.0], [20.0, 10.0, 10.0]);
        assert!(a.intersects(&b));
        assert!(!a.overlaps_with_volume(&b));
        let isect = a.intersection(&b).unwrap();
        assert_eq!(isect.extent(Axis::X), 0.0);
        assert_eq!(isect.extent(Axis::Y), 10.0);
    }

    #[test]
    fn validity() {
        assert!(cube([0.0; 3], [0.0; 3]).is_valid());
        assert!(!cube([1.0, 0.0, 0.0], [0.0, 1.0, 1.0]).is_valid());
        assert!(!cube([f64::NAN, 0.0, 0.0], [1.0; 3]).is_valid());
        assert!(!cube([0.0; 3], [f64::INFINITY, 1.0, 1.0]).is_valid());
    }

    #[test]
    fn union_contains() {
        let a = cube([0.0; 3], [1.0; 3]);
        let b = cube([2.0, -1.0, 0.5], [3.0, 0.5, 4.0]);
        let u = a.union(&b);
        assert!(u.contains(&a) && u.contains(&b));
        assert_eq!(u, cube([0.0, -1.0, 0.0], [3.0, 1.0, 4.0]));
        assert!(u.contains_point(Vec3::new(3.0, 1.0, 4.0)));
        assert!(!a.contains_point(Vec3::new(1.0, 1.0, 1.5)));
    }
}
