// aerie_core/src/prelude.rs

// --- Core Abstractions (The main contracts of the library) ---
pub use crate::aid::{AidContext, AidSource, StopReason, Transition};
pub use crate::nav::NavigationFilter;
pub use crate::types::{Finite, Sample, TimeUs};

// --- Core Data Structures ---
pub use crate::aid::controller::{AidSourceController, TransitionCounters};
pub use crate::aid::flags::ControlStatusFlags;
pub use crate::aid::status::AidSourceStatus;
pub use crate::buffer::DelayedBuffer;
pub use crate::error::{BufferError, EstimatorError, FusionError};
pub use crate::nav::{ImuSample, NavAxis, NavState};
pub use crate::params::{EstimatorParams, HeightRef, HoverThrustParams};

// --- Estimation Algorithms ---
pub use crate::estimation::bias::BiasEstimator;
pub use crate::estimation::hover_thrust::HoverThrustFilter;
pub use crate::estimation::FuseOutcome;

// --- Concrete Implementations (Export common ones for convenience) ---
pub use crate::aid::sources::{GnssSample, VisionSample};
pub use crate::estimator::{AidingEstimator, SourceSummary};
pub use crate::hover_thrust::{
    HoverThrustEstimator, HoverThrustStatus, LocalPositionSample, VehicleLandState,
};
pub use crate::nav::decoupled::DecoupledNavFilter;
