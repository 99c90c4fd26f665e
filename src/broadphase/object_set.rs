use thunderdome as td;

use super::{
    aabb::AABB,
    aggregate::AggregateHandle,
    filter::{FilterData, ObjectAttributes},
    spatial_index::ProxyId,
};
use crate::error::BroadPhaseError;

/// Key type to look up a tracked object in the broad phase.
///
/// Handles are generation-checked, so a handle to a removed object
/// never refers to an object inserted later in the same slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectHandle(pub(super) td::Index);

impl ObjectHandle {
    /// Get the underlying [`thunderdome::Index`][thunderdome::Index] of this key.
    /// Useful for creating your own mappings from objects to other things.
    #[inline]
    pub fn index(&self) -> td::Index {
        self.0
    }
}

// ordering only needs to be consistent, it's used to canonicalize pairs
impl PartialOrd for ObjectHandle {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectHandle {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.0.slot(), self.0.to_bits()).cmp(&(other.0.slot(), other.0.to_bits()))
    }
}

/// Opaque reference to the actor that owns a tracked object.
/// The broad phase never dereferences it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub struct ActorId(pub u64);

/// What kind of body a tracked object belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub enum BodyKind {
    #[default]
    Static,
    Dynamic,
    Kinematic,
}

bitflags::bitflags! {
    /// How a shape takes part in collision detection.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
    pub struct ShapeFlags: u8 {
        /// Generates contacts with other simulation shapes.
        const SIMULATION = 1 << 0;
        /// Only reports overlaps, never generates contacts.
        const TRIGGER = 1 << 1;
    }
}

/// Everything needed to start tracking an object.
#[derive(Clone, Copy, Debug)]
pub struct ObjectDesc {
    pub aabb: AABB,
    pub body: BodyKind,
    pub flags: ShapeFlags,
    pub filter_data: FilterData,
    pub owner: ActorId,
}

impl ObjectDesc {
    /// A simulation shape with default filter data.
    pub fn new(aabb: AABB, body: BodyKind) -> Self {
        Self {
            aabb,
            body,
            flags: ShapeFlags::SIMULATION,
            filter_data: FilterData::default(),
            owner: ActorId::default(),
        }
    }

    pub fn trigger(aabb: AABB, body: BodyKind) -> Self {
        Self {
            flags: ShapeFlags::TRIGGER,
            ..Self::new(aabb, body)
        }
    }

    pub fn with_filter_data(mut self, filter_data: FilterData) -> Self {
        self.filter_data = filter_data;
        self
    }

    pub fn with_owner(mut self, owner: ActorId) -> Self {
        self.owner = owner;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), BroadPhaseError> {
        if self.flags.contains(ShapeFlags::SIMULATION | ShapeFlags::TRIGGER) {
            return Err(BroadPhaseError::InvalidConfiguration(
                "a shape can't be both a simulation shape and a trigger",
            ));
        }
        if self.flags.is_empty() {
            return Err(BroadPhaseError::InvalidConfiguration(
                "a shape needs the simulation or trigger flag to be tracked",
            ));
        }
        if !self.aabb.is_valid() {
            return Err(BroadPhaseError::InvalidGeometry(
                "bounding boxes must be finite with min <= max",
            ));
        }
        Ok(())
    }
}

/// An object tracked by the broad phase.
#[derive(Clone, Debug)]
pub struct TrackedObject {
    pub(crate) aabb: AABB,
    pub(crate) body: BodyKind,
    pub(crate) flags: ShapeFlags,
    pub(crate) filter_data: FilterData,
    pub(crate) owner: ActorId,
    // None while queued for insertion or while part of an aggregate
    pub(crate) proxy: Option<ProxyId>,
    pub(crate) aggregate: Option<AggregateHandle>,
}

impl TrackedObject {
    #[inline]
    pub fn aabb(&self) -> AABB {
        self.aabb
    }

    #[inline]
    pub fn body(&self) -> BodyKind {
        self.body
    }

    #[inline]
    pub fn flags(&self) -> ShapeFlags {
        self.flags
    }

    #[inline]
    pub fn filter_data(&self) -> FilterData {
        self.filter_data
    }

    #[inline]
    pub fn owner(&self) -> ActorId {
        self.owner
    }

    #[inline]
    pub fn aggregate(&self) -> Option<AggregateHandle> {
        self.aggregate
    }

    #[inline]
    pub fn is_trigger(&self) -> bool {
        self.flags.contains(ShapeFlags::TRIGGER)
    }

    pub fn attributes(&self) -> ObjectAttributes {
        ObjectAttributes::new(self.body, self.is_trigger())
    }
}

/// Storage for tracked objects.
#[derive(Clone, Debug, Default)]
pub(crate) struct ObjectSet {
    objects: td::Arena<TrackedObject>,
}

impl ObjectSet {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, desc: ObjectDesc) -> ObjectHandle {
        ObjectHandle(self.objects.insert(TrackedObject {
            aabb: desc.aabb,
            body: desc.body,
            flags: desc.flags,
            filter_data: desc.filter_data,
            owner: desc.owner,
            proxy: None,
            aggregate: None,
        }))
    }

    #[inline]
    pub fn remove(&mut self, handle: ObjectHandle) -> Option<TrackedObject> {
        self.objects.remove(handle.0)
    }

    #[inline]
    pub fn get(&self, handle: ObjectHandle) -> Option<&TrackedObject> {
        self.objects.get(handle.0)
    }

    #[inline]
    pub fn get_mut(&mut self, handle: ObjectHandle) -> Option<&mut TrackedObject> {
        self.objects.get_mut(handle.0)
    }

    /// Like [`get`][Self::get], but with a stale handle error.
    #[inline]
    pub fn try_get(&self, handle: ObjectHandle) -> Result<&TrackedObject, BroadPhaseError> {
        self.get(handle).ok_or(BroadPhaseError::StaleObject(handle))
    }

    #[inline]
    pub fn try_get_mut(
        &mut self,
        handle: ObjectHandle,
    ) -> Result<&mut TrackedObject, BroadPhaseError> {
        self.get_mut(handle).ok_or(BroadPhaseError::StaleObject(handle))
    }

    #[inline]
    pub fn contains(&self, handle: ObjectHandle) -> bool {
        self.objects.contains(handle.0)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn iter(&self) -> impl '_ + Iterator<Item = (ObjectHandle, &TrackedObject)> {
        self.objects.iter().map(|(idx, obj)| (ObjectHandle(idx), obj))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_combinations() {
        let aabb = AABB::zero();
        assert!(ObjectDesc::new(aabb, BodyKind::Dynamic).validate().is_ok());
        assert!(ObjectDesc::trigger(aabb, BodyKind::Static).validate().is_ok());

        let mut both = ObjectDesc::new(aabb, BodyKind::Dynamic);
        both.flags |= ShapeFlags::TRIGGER;
        assert!(matches!(
            both.validate(),
            Err(BroadPhaseError::InvalidConfiguration(_))
        ));
        let mut neither = both;
        neither.flags = ShapeFlags::empty();
        assert!(neither.validate().is_err());
    }

    #[test]
    fn stale_handles() {
        let mut set = ObjectSet::new();
        let a = set.insert(ObjectDesc::new(AABB::zero(), BodyKind::Static));
        set.remove(a).unwrap();
        let b = set.insert(ObjectDesc::new(AABB::zero(), BodyKind::Static));
        assert_eq!(a.0.slot(), b.0.slot());
        assert!(!set.contains(a));
        assert_eq!(set.try_get(a).unwrap_err(), BroadPhaseError::StaleObject(a));
        assert!(set.try_get(b).is_ok());
        assert_ne!(a.cmp(&b), std::cmp::Ordering::Equal);
    }
}
