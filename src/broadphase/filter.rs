//! Deciding what happens to newly overlapping pairs.
//!
//! Filtering runs in two tiers. The first is a filter shader, a plain
//! function that only sees copies of the two objects' attributes and
//! filter data plus a read-only block of constants. It has no way to look
//! anything else up, so it can be run in parallel over a whole batch of
//! pairs without any locking. If the shader can't decide, it can ask for
//! the pair to be passed on to a [`FilterCallback`], which may consult
//! any state it likes.

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::{fmt, sync::Arc};

use super::object_set::{BodyKind, ObjectHandle};

bitflags::bitflags! {
    /// Behavior of an accepted pair.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
    pub struct PairFlags: u16 {
        /// Pass the pair on to the narrow phase to generate contacts.
        const GENERATE_CONTACTS = 1 << 0;
        /// Report a found event when the pair starts touching.
        const NOTIFY_TOUCH_FOUND = 1 << 1;
        /// Report a lost event when the pair stops touching.
        /// Only reported if a found event was reported before it.
        const NOTIFY_TOUCH_LOST = 1 << 2;
        /// Overlap-only semantics: events are trigger events, no contacts.
        const TRIGGER = 1 << 3;

        const TRIGGER_DEFAULT = Self::NOTIFY_TOUCH_FOUND.bits()
            | Self::NOTIFY_TOUCH_LOST.bits()
            | Self::TRIGGER.bits();
    }
}

bitflags::bitflags! {
    /// The kind of object as seen by the filter shader.
    ///
    /// Static objects have no bits set. Kinematic objects are dynamic
    /// objects with the kinematic bit added.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
    pub struct ObjectAttributes: u8 {
        const DYNAMIC = 1 << 0;
        const KINEMATIC = 1 << 1;
        const TRIGGER = 1 << 2;
    }
}

impl ObjectAttributes {
    pub fn new(body: BodyKind, trigger: bool) -> Self {
        let mut attrs = match body {
            BodyKind::Static => Self::empty(),
            BodyKind::Dynamic => Self::DYNAMIC,
            BodyKind::Kinematic => Self::DYNAMIC | Self::KINEMATIC,
        };
        attrs.set(Self::TRIGGER, trigger);
        attrs
    }

    #[inline]
    pub fn is_static(self) -> bool {
        !self.contains(Self::DYNAMIC)
    }

    #[inline]
    pub fn is_kinematic(self) -> bool {
        self.contains(Self::KINEMATIC)
    }

    #[inline]
    pub fn is_trigger(self) -> bool {
        self.contains(Self::TRIGGER)
    }
}

/// 128 bits of per-object data for the filter shader to interpret.
///
/// The default shader reads word 0 as a group bitmask and word 1 as the mask
/// of groups the object wants to be notified about. The other words are free
/// for custom shaders.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub struct FilterData {
    pub words: [u32; 4],
}

impl FilterData {
    pub const fn new(words: [u32; 4]) -> Self {
        Self { words }
    }

    pub const fn group_mask(group: u32, mask: u32) -> Self {
        Self {
            words: [group, mask, 0, 0],
        }
    }

    #[inline]
    pub fn group(&self) -> u32 {
        self.words[0]
    }

    #[inline]
    pub fn mask(&self) -> u32 {
        self.words[1]
    }
}

/// Everything a filter shader gets to see about a pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilterPairInput {
    pub attributes: [ObjectAttributes; 2],
    pub data: [FilterData; 2],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub enum FilterDisposition {
    /// Ignore the pair for as long as it keeps overlapping.
    Kill,
    /// Ignore the pair for now, but filter it again if either object's
    /// filter data changes while the pair still overlaps.
    Suppress,
    /// Accept the pair with the decision's flags.
    Default,
}

/// Output of the filter stage for one pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilterDecision {
    pub disposition: FilterDisposition,
    pub flags: PairFlags,
    /// Ask for the pair to be passed to the [`FilterCallback`].
    /// Ignored if no callback is set.
    pub callback: bool,
}

impl FilterDecision {
    pub const fn kill() -> Self {
        Self {
            disposition: FilterDisposition::Kill,
            flags: PairFlags::empty(),
            callback: false,
        }
    }

    pub const fn suppress() -> Self {
        Self {
            disposition: FilterDisposition::Suppress,
            flags: PairFlags::empty(),
            callback: false,
        }
    }

    pub const fn accept(flags: PairFlags) -> Self {
        Self {
            disposition: FilterDisposition::Default,
            flags,
            callback: false,
        }
    }

    pub const fn with_callback(mut self) -> Self {
        self.callback = true;
        self
    }
}

/// A pure filter function. Gets the pair's inputs and the constant block
/// given in [`BroadPhaseParams`][super::BroadPhaseParams].
pub type FilterShader = fn(&FilterPairInput, &[u8]) -> FilterDecision;

/// The filter shader used unless another one is configured.
///
/// Pairs involving a trigger get [`PairFlags::TRIGGER_DEFAULT`].
/// Other pairs generate contacts, and are reported as found and lost only if
/// each object's mask (word 1) shares a bit with the other's group (word 0).
pub fn default_filter_shader(input: &FilterPairInput, _constants: &[u8]) -> FilterDecision {
    let [attrs_a, attrs_b] = input.attributes;
    if attrs_a.is_trigger() || attrs_b.is_trigger() {
        return FilterDecision::accept(PairFlags::TRIGGER_DEFAULT);
    }

    let [a, b] = input.data;
    let mut flags = PairFlags::GENERATE_CONTACTS;
    if a.mask() & b.group() != 0 && b.mask() & a.group() != 0 {
        flags |= PairFlags::NOTIFY_TOUCH_FOUND | PairFlags::NOTIFY_TOUCH_LOST;
    }
    FilterDecision::accept(flags)
}

/// User-defined filter for pairs the filter shader passes on.
///
/// Calls may come from several threads at once when the `parallel` feature
/// is enabled; nothing is locked on the way in.
pub trait FilterCallback: Send + Sync {
    /// Decide the fate of a pair. `shader_decision` is what the filter shader
    /// returned for it. The result is cached like a shader result would be.
    fn pair_found(
        &self,
        objects: [ObjectHandle; 2],
        input: &FilterPairInput,
        shader_decision: FilterDecision,
    ) -> FilterDecision;

    /// Called when a pair accepted through this callback stops overlapping,
    /// or when one of its objects is removed.
    fn pair_lost(&self, _objects: [ObjectHandle; 2], _object_removed: bool) {}
}

/// A pair waiting to be filtered.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FilterJob {
    pub objects: [ObjectHandle; 2],
    pub input: FilterPairInput,
}

#[derive(Clone)]
pub(crate) struct FilterStage {
    shader: FilterShader,
    constants: Arc<[u8]>,
    callback: Option<Arc<dyn FilterCallback>>,
}

impl fmt::Debug for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterStage")
            .field("constants", &self.constants.len())
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl FilterStage {
    pub fn new(shader: FilterShader, constants: Vec<u8>) -> Self {
        Self {
            shader,
            constants: Arc::from(constants),
            callback: None,
        }
    }

    pub fn set_callback(&mut self, callback: Option<Arc<dyn FilterCallback>>) {
        self.callback = callback;
    }

    pub fn callback(&self) -> Option<&dyn FilterCallback> {
        self.callback.as_deref()
    }

    /// Run the shader and, if it asks for it, the callback.
    ///
    /// The returned decision's `callback` field tells whether
    /// the callback was actually consulted.
    pub fn run(&self, job: &FilterJob) -> FilterDecision {
        let decision = (self.shader)(&job.input, &self.constants);
        if !decision.callback {
            return decision;
        }
        match &self.callback {
            Some(callback) => FilterDecision {
                callback: true,
                ..callback.pair_found(job.objects, &job.input, decision)
            },
            None => FilterDecision {
                callback: false,
                ..decision
            },
        }
    }

    pub fn run_batch(&self, jobs: &[FilterJob]) -> Vec<FilterDecision> {
        let _span = tracy_span!("filter pairs", "run_batch");
        #[cfg(feature = "parallel")]
        let decisions = jobs.par_iter().map(|job| self.run(job)).collect();
        #[cfg(not(feature = "parallel"))]
        let decisions = jobs.iter().map(|job| self.run(job)).collect();
        decisions
    }
}
