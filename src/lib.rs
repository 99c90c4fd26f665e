//! Broad phase collision detection for rigid body physics.
//!
//! [`BroadPhase`][broadphase::BroadPhase] tracks a population of axis-aligned
//! bounding boxes, finds the pairs of them that overlap, runs those pairs
//! through a filtering stage and reports pairs that start and stop touching.
//! Three spatial index strategies are available, see
//! [`IndexStrategy`][broadphase::IndexStrategy].

// profiling spans that compile to nothing unless the `tracy` feature is on
macro_rules! tracy_span {
    ($name:literal, $fn_name:literal) => {
        tracy_client::Client::running()
            .map(|client| client.span_alloc(Some($name), $fn_name, file!(), line!(), 0))
    };
}

pub mod math;
pub use math::{uv, Axis, Vec3};

pub mod error;
pub use error::{BroadPhaseError, ErrorCategory};

pub mod broadphase;
pub use broadphase::{
    aabb::AABB,
    aggregate::AggregateHandle,
    bounds_tracker::{BoundsEvent, BoundsTarget},
    events::{PairEvent, PairKind, StepEvents},
    filter::{
        default_filter_shader, FilterCallback, FilterData, FilterDecision, FilterDisposition,
        FilterPairInput, FilterShader, ObjectAttributes, PairFlags,
    },
    interaction::{Classification, Interaction, TouchState},
    object_set::{ActorId, BodyKind, ObjectDesc, ObjectHandle, ShapeFlags, TrackedObject},
    region::{regions_from_world_bounds, RegionHandle, RegionInfo},
    AutoGridParams, BroadPhase, BroadPhaseCaps, BroadPhaseParams, IndexStrategy,
};
