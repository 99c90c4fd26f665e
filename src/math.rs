//! Types and aliases for doing math with `ultraviolet`.

pub use ultraviolet as uv;

pub type Vec3 = uv::DVec3;

/// One of the three coordinate axes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub enum Axis {
    X,
    #[default]
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// Get the component of a vector along this axis.
    #[inline]
    pub fn of(self, v: Vec3) -> f64 {
        match self {
            Axis::X => v.x,
            Axis::Y => v.y,
            Axis::Z => v.z,
        }
    }

    /// Set the component of a vector along this axis.
    #[inline]
    pub fn set(self, v: &mut Vec3, value: f64) {
        match self {
            Axis::X => v.x = value,
            Axis::Y => v.y = value,
            Axis::Z => v.z = value,
        }
    }

    /// The two axes perpendicular to this one, in ascending order.
    ///
    /// With `Y` as the up axis this gives the ground plane axes `X` and `Z`.
    #[inline]
    pub fn plane(self) -> (Axis, Axis) {
        match self {
            Axis::X => (Axis::Y, Axis::Z),
            Axis::Y => (Axis::X, Axis::Z),
            Axis::Z => (Axis::X, Axis::Y),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_components() {
        let v = Vec3::new(1.0, 2.0, 3.0);
        itertools::assert_equal(Axis::ALL.iter().map(|a| a.of(v)), [1.0, 2.0, 3.0]);
        assert_eq!(Axis::Y.plane(), (Axis::X, Axis::Z));
        let mut w = v;
        Axis::Z.set(&mut w, 7.0);
        assert_eq!(w, Vec3::new(1.0, 2.0, 7.0));
    }
}
