// aerie_core/src/aid/mod.rs

//! Admission control for aiding sources.
//!
//! Every source runs the same start/continue/stop state machine
//! ([`controller::AidSourceController`]); what differs between sources is
//! captured by the small [`AidSource`] trait.

use nalgebra::SVector;
use serde::Serialize;
use std::fmt::{self, Debug};

use crate::aid::flags::ControlStatusFlags;
use crate::aid::status::AidSourceStatus;
use crate::nav::{ImuSample, NavAxis, NavigationFilter};
use crate::params::EstimatorParams;
use crate::types::{wrap_pi, Finite, Sample, TimeUs};

pub mod controller;
pub mod flags;
pub mod sources;
pub mod status;

/// Everything a source may look at while it is evaluated, frozen for one cycle.
#[derive(Debug, Clone, Copy)]
pub struct AidContext<'a> {
    /// The fusion horizon: timestamp of the delayed IMU sample the filter sits at.
    pub time_us: TimeUs,
    pub params: &'a EstimatorParams,
    /// The delayed IMU sample the filter was just propagated with.
    pub imu: &'a ImuSample,
    /// No vertical aiding has been fused for longer than the no-aid timeout.
    pub vertical_dead_reckon_exceeded: bool,
    /// Down position at the last time vertical aiding was active.
    pub last_known_pos_d: f64,
}

/// Why an active source was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    ContinuingConditionsFailing,
    NoData,
    Requested,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::ContinuingConditionsFailing => write!(f, "continuing conditions failing"),
            StopReason::NoData => write!(f, "no data"),
            StopReason::Requested => write!(f, "requested"),
        }
    }
}

/// What one controller evaluation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Transition {
    /// Nothing changed (inactive and not ready, rate limited, or no sample due).
    Idle,
    Started,
    /// Active and still admitted.
    Continued,
    /// Active, but fusion timed out; the state was reseeded from the sample.
    Reset,
    Stopped(StopReason),
}

/// The named admission predicates of the last evaluation with a sample.
///
/// `starting` is built from `continuing`, so it can never be the weaker of the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AdmissionPredicates {
    /// Quality of the sample evaluated this cycle.
    pub quality_sufficient: bool,
    /// Quality of the sample evaluated in the previous cycle.
    pub prev_quality_sufficient: bool,
    /// Quality of the newest sample still waiting in the buffer.
    pub newest_quality_sufficient: bool,
    pub competing_aiding_active: bool,
    /// The newest sample is no older than the source's maximum interval.
    pub newest_sample_recent: bool,
    /// The gap to the previous sample is below the source's maximum interval.
    pub sample_gap_ok: bool,
    /// Source-specific part of the continuing conditions.
    pub source_continuing: bool,
    /// Source-specific readiness checks.
    pub source_starting: bool,

    pub continuing: bool,
    pub starting: bool,
}

impl AdmissionPredicates {
    pub(crate) fn combine(mut self) -> Self {
        self.continuing = self.quality_sufficient
            && self.prev_quality_sufficient
            && !self.competing_aiding_active
            && self.newest_sample_recent
            && self.source_continuing;

        self.starting = self.continuing
            && self.newest_quality_sufficient
            && self.sample_gap_ok
            && self.source_starting;

        self
    }
}

// --- AIDING SOURCE TRAIT ---
/// The per-source behavior plugged into the generic admission controller.
///
/// `N` is the number of navigation states the source observes.
pub trait AidSource<const N: usize>: Debug + Clone + Send + Sync {
    type Payload: Clone + Debug + Finite + Send + Sync;

    fn name(&self) -> &'static str;

    /// Reads this source's bit of the shared activation flags.
    fn is_active(&self, flags: &ControlStatusFlags) -> bool;

    /// Writes this source's bit. Only the controller calls this, on start and stop.
    fn set_active(&self, flags: &mut ControlStatusFlags, active: bool);

    /// Longest acceptable age of the newest sample before the stream counts as lost.
    fn max_sample_interval_us(&self, _params: &EstimatorParams) -> u64 {
        u64::MAX
    }

    /// Minimum time between two evaluations. `None` evaluates every cycle.
    fn fusion_interval_us(&self, _params: &EstimatorParams) -> Option<u64> {
        None
    }

    /// Time without a successful fusion after which the source is reseeded.
    /// `None` disables the timeout.
    fn fusion_timeout_us(&self, params: &EstimatorParams) -> Option<u64>;

    /// Buffer-less sources produce their sample from the current state here.
    fn synthesize(
        &mut self,
        _nav: &dyn NavigationFilter,
        _flags: &ControlStatusFlags,
        _cx: &AidContext,
    ) -> Option<Sample<Self::Payload>> {
        None
    }

    fn has_quality_channel(&self) -> bool {
        false
    }

    fn quality_sufficient(&self, _params: &EstimatorParams, _payload: &Self::Payload) -> bool {
        true
    }

    /// Another source of the same kind is active and takes precedence.
    fn competing_aiding_active(&self, _flags: &ControlStatusFlags) -> bool {
        false
    }

    /// Source-specific conditions that must hold for an active source to stay active.
    fn continuing_conditions(
        &self,
        _cx: &AidContext,
        _flags: &ControlStatusFlags,
        _sample: &Sample<Self::Payload>,
    ) -> bool {
        true
    }

    /// Additional readiness checks required to start, on top of the continuing conditions.
    fn starting_conditions(
        &self,
        _cx: &AidContext,
        _flags: &ControlStatusFlags,
        _sample: &Sample<Self::Payload>,
    ) -> bool {
        true
    }

    /// Computes observation, innovation and test ratio into `status`.
    fn update_status(
        &mut self,
        nav: &dyn NavigationFilter,
        cx: &AidContext,
        flags: &ControlStatusFlags,
        sample: &Sample<Self::Payload>,
        status: &mut AidSourceStatus<N>,
    );

    /// Applies a gated observation. Returns whether the filter was updated.
    fn fuse(
        &mut self,
        nav: &mut dyn NavigationFilter,
        cx: &AidContext,
        flags: &ControlStatusFlags,
        status: &AidSourceStatus<N>,
    ) -> bool;

    /// Called on the inactive to active transition, before the first fusion.
    fn start(
        &mut self,
        _nav: &mut dyn NavigationFilter,
        _cx: &AidContext,
        _flags: &mut ControlStatusFlags,
        _sample: &Sample<Self::Payload>,
        _status: &AidSourceStatus<N>,
    ) {
    }

    /// Reseeds the observed states after a fusion timeout.
    fn reset(
        &mut self,
        nav: &mut dyn NavigationFilter,
        cx: &AidContext,
        flags: &mut ControlStatusFlags,
        sample: &Sample<Self::Payload>,
        status: &AidSourceStatus<N>,
    );

    fn stop(&mut self, _flags: &mut ControlStatusFlags) {}
}

// --- Shared Observation Helpers ---

/// Fills `status` for a direct observation of `axes`.
///
/// The innovation is measurement minus prediction, wrapped for angles.
pub fn update_axes_status<const N: usize>(
    nav: &dyn NavigationFilter,
    axes: &[NavAxis; N],
    time_us: TimeUs,
    observation: SVector<f64, N>,
    observation_variance: SVector<f64, N>,
    gate_size: f64,
    status: &mut AidSourceStatus<N>,
) {
    let mut innovation = SVector::<f64, N>::zeros();
    let mut innovation_variance = SVector::<f64, N>::zeros();

    for (k, axis) in axes.iter().enumerate() {
        let (value, variance) = nav.observe(*axis);
        let innov = observation[k] - value;
        innovation[k] = if axis.is_angle() { wrap_pi(innov) } else { innov };
        innovation_variance[k] = variance + observation_variance[k];
    }

    status.update(
        time_us,
        observation,
        observation_variance,
        innovation,
        innovation_variance,
        gate_size,
    );
}

/// Sequentially fuses every axis of `status`. Returns true only if all succeeded.
pub fn fuse_axes<const N: usize>(
    nav: &mut dyn NavigationFilter,
    axes: &[NavAxis; N],
    status: &AidSourceStatus<N>,
) -> bool {
    axes.iter().enumerate().fold(true, |all, (k, axis)| {
        let fused = nav.fuse_axis(*axis, status.innovation[k], status.innovation_variance[k]);
        all && fused
    })
}

/// Overwrites `axes` with the observation in `status`.
pub fn reset_axes<const N: usize>(
    nav: &mut dyn NavigationFilter,
    axes: &[NavAxis; N],
    status: &AidSourceStatus<N>,
) {
    for (k, axis) in axes.iter().enumerate() {
        nav.reset_axis(*axis, status.observation[k], status.observation_variance[k]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nav::decoupled::DecoupledNavFilter;
    use approx::assert_abs_diff_eq;
    use nalgebra::{Vector1, Vector2};

    #[test]
    fn test_starting_never_weaker_than_continuing() {
        // exhaustively check every combination of the individual predicates
        for bits in 0u32..(1 << 8) {
            let bit = |i: u32| bits & (1 << i) != 0;
            let predicates = AdmissionPredicates {
                quality_sufficient: bit(0),
                prev_quality_sufficient: bit(1),
                newest_quality_sufficient: bit(2),
                competing_aiding_active: bit(3),
                newest_sample_recent: bit(4),
                sample_gap_ok: bit(5),
                source_continuing: bit(6),
                source_starting: bit(7),
                ..Default::default()
            }
            .combine();

            assert!(!predicates.starting || predicates.continuing);
        }
    }

    #[test]
    fn test_angle_innovation_is_wrapped() {
        let mut nav = DecoupledNavFilter::default();
        nav.reset_axis(NavAxis::Yaw, 3.1, 0.01);

        let mut status = AidSourceStatus::<1>::default();
        update_axes_status(
            &nav,
            &[NavAxis::Yaw],
            5,
            Vector1::new(-3.1),
            Vector1::new(0.01),
            3.0,
            &mut status,
        );

        assert_abs_diff_eq!(status.innovation[0], 2.0 * std::f64::consts::PI - 6.2, epsilon = 1e-9);
        assert_abs_diff_eq!(status.innovation_variance[0], 0.02, epsilon = 1e-12);
        assert!(!status.rejected);
    }

    #[test]
    fn test_fuse_and_reset_axes() {
        let mut nav = DecoupledNavFilter::default();
        let axes = [NavAxis::PosN, NavAxis::PosE];

        let mut status = AidSourceStatus::<2>::default();
        update_axes_status(
            &nav,
            &axes,
            5,
            Vector2::new(1.0, -1.0),
            Vector2::repeat(1.0),
            5.0,
            &mut status,
        );
        assert!(fuse_axes(&mut nav, &axes, &status));
        assert!(nav.observe(NavAxis::PosN).0 > 0.9);
        assert!(nav.observe(NavAxis::PosE).0 < -0.9);

        reset_axes(&mut nav, &axes, &status);
        assert_eq!(nav.observe(NavAxis::PosN), (1.0, 1.0));
    }
}
