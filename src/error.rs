//! Errors and diagnostics reported by the broad phase.
//!
//! None of these are fatal. A call that fails leaves the broad phase exactly
//! as it was before the call, and errors that happen during a step
//! (e.g. an interaction dropped because of the per-object cap) are reported
//! in [`StepEvents::diagnostics`][crate::broadphase::events::StepEvents::diagnostics].

use crate::broadphase::{aggregate::AggregateHandle, object_set::ObjectHandle, region::RegionHandle};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BroadPhaseError {
    #[error("object {object:?} already has {cap} interactions, dropped its pair with {other:?}")]
    InteractionCapExceeded {
        object: ObjectHandle,
        other: ObjectHandle,
        cap: usize,
    },
    #[error("cannot have more than {cap} regions at once")]
    RegionCapExceeded { cap: usize },
    #[error("aggregate {aggregate:?} is full ({cap} members)")]
    AggregateFull {
        aggregate: AggregateHandle,
        cap: usize,
    },
    #[error("aggregate capacity {requested} is outside the allowed range 1..={max}")]
    AggregateCapacity { requested: usize, max: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error("invalid geometry: {0}")]
    InvalidGeometry(&'static str),
    #[error("object {0:?} does not exist (already removed?)")]
    StaleObject(ObjectHandle),
    #[error("region {0:?} does not exist (already removed?)")]
    StaleRegion(RegionHandle),
    #[error("aggregate {0:?} does not exist (already released?)")]
    StaleAggregate(AggregateHandle),
    #[error("object {0:?} is already a member of an aggregate")]
    AlreadyInAggregate(ObjectHandle),
    #[error("object {object:?} is not a member of aggregate {aggregate:?}")]
    NotInAggregate {
        object: ObjectHandle,
        aggregate: AggregateHandle,
    },
    #[error("the active spatial index does not use explicit regions")]
    RegionsUnsupported,
}

/// Broad classes of [`BroadPhaseError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A fixed limit was hit and the offending request was dropped.
    CapacityExceeded,
    /// The request didn't make sense and was rejected.
    InvalidConfiguration,
    /// The caller used a handle that no longer refers to anything.
    Misuse,
}

impl BroadPhaseError {
    pub fn category(&self) -> ErrorCategory {
        use BroadPhaseError::*;
        match self {
            InteractionCapExceeded { .. }
            | RegionCapExceeded { .. }
            | AggregateFull { .. }
            | AggregateCapacity { .. } => ErrorCategory::CapacityExceeded,
            InvalidConfiguration(_) | InvalidGeometry(_) | RegionsUnsupported => {
                ErrorCategory::InvalidConfiguration
            }
            StaleObject(_)
            | StaleRegion(_)
            | StaleAggregate(_)
            | AlreadyInAggregate(_)
            | NotInAggregate { .. } => ErrorCategory::Misuse,
        }
    }
}
