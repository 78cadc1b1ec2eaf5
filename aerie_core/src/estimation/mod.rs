// aerie_core/src/estimation/mod.rs

//! Scalar sequential filters and the gating policy shared by every aiding source.

use serde::Serialize;

pub mod bias;
pub mod hover_thrust;
pub mod hysteresis;
pub mod lowpass;

/// Above this magnitude the low-passed, sign-preserving test ratio indicates a
/// persistent offset that the gate keeps rejecting.
pub const DIVERGENCE_TEST_RATIO_THRESHOLD: f64 = 0.2;

/// Normalized innovation squared, scaled by the gate: `innov^2 / (gate^2 * S)`.
pub fn innovation_test_ratio(innovation: f64, innovation_variance: f64, gate_size: f64) -> f64 {
    innovation * innovation / (gate_size * gate_size * innovation_variance)
}

/// A measurement is admitted only when its test ratio is strictly below one.
pub fn is_test_ratio_passing(test_ratio: f64) -> bool {
    test_ratio < 1.0
}

/// What a single scalar `fuse` call did.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct FuseOutcome {
    /// Measurement minus prediction, before the update.
    pub innovation: f64,
    pub innovation_variance: f64,
    pub test_ratio: f64,
    /// Measurement minus prediction after the update (equals `innovation` when rejected).
    pub residual: f64,
    pub fused: bool,
    /// The state variance was inflated to recover from a suspected divergence.
    pub variance_bumped: bool,
}
