// aerie_core/src/error.rs

use crate::types::TimeUs;
use thiserror::Error;

/// Failures of the delayed sample buffer.
///
/// Only allocation is a hard failure; everything else the buffer does
/// (eviction, misses) is ordinary control flow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("buffer capacity must be greater than zero")]
    ZeroCapacity,

    #[error("could not obtain storage for {capacity} samples")]
    AllocationFailed { capacity: usize },

    #[error("buffer has not been allocated")]
    NotAllocated,

    #[error("sample at {time_us} us contains non-finite values")]
    NonFinite { time_us: TimeUs },
}

/// Input validation failures at the fusion boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FusionError {
    #[error("non-finite {what} passed to fuse")]
    NonFinite { what: &'static str },

    #[error("invalid time step: {dt} s")]
    InvalidTimeStep { dt: f64 },
}

/// Errors surfaced by the per-cycle estimator pass.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EstimatorError {
    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Fusion(#[from] FusionError),
}
