use super::{
    bounds_tracker::BoundsEvent, filter::PairFlags, object_set::ObjectHandle, pairs::Pair,
};
use crate::error::BroadPhaseError;

/// Whether a pair event is about a contact pair or a trigger overlap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub enum PairKind {
    Contact,
    Trigger,
}

/// A pair of objects that started or stopped touching.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PairEvent {
    /// The two objects, smaller handle first.
    /// The handles may refer to objects that were removed during the step.
    pub objects: [ObjectHandle; 2],
    pub flags: PairFlags,
    pub kind: PairKind,
}

impl PairEvent {
    pub(crate) fn new(pair: Pair<ObjectHandle>, flags: PairFlags) -> Self {
        Self {
            objects: pair.as_array(),
            flags,
            kind: if flags.contains(PairFlags::TRIGGER) {
                PairKind::Trigger
            } else {
                PairKind::Contact
            },
        }
    }

    #[inline]
    pub fn involves(&self, object: ObjectHandle) -> bool {
        self.objects.contains(&object)
    }
}

/// Everything that happened since the previous step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepEvents {
    pub found: Vec<PairEvent>,
    pub lost: Vec<PairEvent>,
    pub bounds: Vec<BoundsEvent>,
    /// Errors from calls since the last step and from the step itself.
    pub diagnostics: Vec<BroadPhaseError>,
}

impl StepEvents {
    pub fn is_empty(&self) -> bool {
        self.found.is_empty()
            && self.lost.is_empty()
            && self.bounds.is_empty()
            && self.diagnostics.is_empty()
    }
}
