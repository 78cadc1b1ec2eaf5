// aerie_core/src/hover_thrust.rs

//! Vehicle-level wrapper around [`HoverThrustFilter`].
//!
//! Feeds the filter from the local-position estimate and the thrust setpoint,
//! resets it to the configured prior while landed and publishes a
//! [`HoverThrustStatus`] snapshot after every cycle.

use nalgebra::Vector3;
use serde::Serialize;
use tracing::debug;

use crate::error::FusionError;
use crate::estimation::hover_thrust::HoverThrustFilter;
use crate::estimation::hysteresis::Hysteresis;
use crate::params::HoverThrustParams;
use crate::types::TimeUs;

const DT_MIN: f64 = 0.002;
const DT_MAX: f64 = 0.2;
const VALID_VARIANCE_MAX: f64 = 0.001;
const VALID_HOLD_TIME_US: u64 = 2_000_000;

/// One sample of the local-position estimate, NED frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LocalPositionSample {
    pub time_us: TimeUs,
    /// Vertical acceleration, positive down.
    pub accel_d: f64,
    pub velocity: Vector3<f64>,
    pub v_xy_valid: bool,
    pub v_z_valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VehicleLandState {
    pub armed: bool,
    pub landed: bool,
}

/// Published after each update.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct HoverThrustStatus {
    pub timestamp: TimeUs,
    pub timestamp_sample: TimeUs,
    pub hover_thrust: f64,
    pub hover_thrust_var: f64,
    pub accel_innov: f64,
    pub accel_innov_var: f64,
    pub accel_innov_test_ratio: f64,
    pub accel_noise_var: f64,
    pub valid: bool,
}

#[derive(Debug, Clone)]
pub struct HoverThrustEstimator {
    params: HoverThrustParams,
    filter: HoverThrustFilter,
    valid_hysteresis: Hysteresis,
    time_last_us: TimeUs,
    status: HoverThrustStatus,
}

impl HoverThrustEstimator {
    pub fn new(params: HoverThrustParams) -> Self {
        let mut valid_hysteresis = Hysteresis::new(false);
        valid_hysteresis.set_hysteresis_time_from(false, VALID_HOLD_TIME_US);

        let mut estimator = Self {
            params,
            filter: HoverThrustFilter::new(),
            valid_hysteresis,
            time_last_us: 0,
            status: HoverThrustStatus::default(),
        };
        estimator.apply_params();
        estimator.reset();
        estimator
    }

    pub fn params(&self) -> &HoverThrustParams {
        &self.params
    }

    pub fn filter(&self) -> &HoverThrustFilter {
        &self.filter
    }

    /// The most recently published snapshot.
    pub fn status(&self) -> &HoverThrustStatus {
        &self.status
    }

    /// Applies new parameters. The estimate itself is only moved back to the
    /// prior on the next reset.
    pub fn set_params(&mut self, params: HoverThrustParams) {
        self.params = params;
        self.apply_params();
    }

    /// Runs one cycle and returns the published snapshot.
    ///
    /// `thrust_setpoint_z` is the NED thrust setpoint, negative up.
    pub fn update(
        &mut self,
        now_us: TimeUs,
        local_pos: &LocalPositionSample,
        thrust_setpoint_z: f64,
        land_state: VehicleLandState,
    ) -> Result<HoverThrustStatus, FusionError> {
        let dt = (local_pos.time_us.saturating_sub(self.time_last_us) as f64 * 1e-6)
            .clamp(DT_MIN, DT_MAX);
        self.time_last_us = local_pos.time_us;

        if land_state.landed {
            self.reset();
        }

        if land_state.armed && !land_state.landed {
            self.filter.predict(dt)?;

            let thrust = -thrust_setpoint_z;
            if thrust.is_finite() && thrust > 0.0 {
                self.filter
                    .set_measurement_noise_scale(self.noise_scale(local_pos));
                // the filter expects positive up
                self.filter.fuse(-local_pos.accel_d, thrust)?;
            }
        }

        let outcome = *self.filter.last_outcome();
        let valid = land_state.armed
            && !land_state.landed
            && self.filter.hover_thrust_var() < VALID_VARIANCE_MAX
            && outcome.test_ratio < 1.0;
        self.valid_hysteresis.set_state_and_update(valid, now_us);

        self.status = HoverThrustStatus {
            timestamp: now_us,
            timestamp_sample: local_pos.time_us,
            hover_thrust: self.filter.hover_thrust(),
            hover_thrust_var: self.filter.hover_thrust_var(),
            accel_innov: outcome.innovation,
            accel_innov_var: outcome.innovation_variance,
            accel_innov_test_ratio: outcome.test_ratio,
            accel_noise_var: self.filter.measurement_variance(),
            valid: self.valid_hysteresis.state(),
        };

        Ok(self.status)
    }

    /// Moves the filter back to the configured prior.
    pub fn reset(&mut self) {
        self.filter.set_hover_thrust(self.params.hover_thrust);
        self.filter
            .set_hover_thrust_std_dev(self.params.hover_thrust_err_init);
        self.filter.reset_accel_noise();
        self.filter.reset_lpf();
        debug!(
            hover_thrust = self.params.hover_thrust,
            "hover thrust estimate reset to prior"
        );
    }

    // --- Private Helper Methods ---

    fn apply_params(&mut self) {
        self.filter
            .set_min_hover_thrust(self.params.min_hover_thrust());
        self.filter
            .set_max_hover_thrust(self.params.max_hover_thrust());
        self.filter.set_gate_size(self.params.acc_gate);
        self.filter
            .set_process_noise_std_dev(self.params.hover_thrust_noise);
    }

    /// Inflates the measurement noise during fast flight, where drag and
    /// other unmodelled forces dominate the vertical acceleration.
    fn noise_scale(&self, local_pos: &LocalPositionSample) -> f64 {
        let xy = if local_pos.v_xy_valid {
            local_pos.velocity.xy().norm() - self.params.vxy_thr + 1.0
        } else {
            1.0
        };
        let z = if local_pos.v_z_valid {
            local_pos.velocity.z.abs() - self.params.vz_thr + 1.0
        } else {
            1.0
        };
        xy.max(z).max(1.0)
    }
}

impl Default for HoverThrustEstimator {
    fn default() -> Self {
        Self::new(HoverThrustParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ONE_G;
    use approx::assert_abs_diff_eq;

    const FLYING: VehicleLandState = VehicleLandState {
        armed: true,
        landed: false,
    };

    /// NED vertical acceleration produced by `thrust` on a vehicle hovering at `hover_thrust`.
    fn accel_d(hover_thrust: f64, thrust: f64) -> f64 {
        -(ONE_G * thrust / hover_thrust - ONE_G)
    }

    fn fly(
        estimator: &mut HoverThrustEstimator,
        true_hover_thrust: f64,
        from_us: TimeUs,
        cycles: u64,
    ) -> HoverThrustStatus {
        let mut status = *estimator.status();
        for i in 0..cycles {
            let t = from_us + i * 20_000;
            let thrust = true_hover_thrust + if i % 2 == 0 { 0.04 } else { -0.04 };
            let local_pos = LocalPositionSample {
                time_us: t,
                accel_d: accel_d(true_hover_thrust, thrust),
                ..Default::default()
            };
            status = estimator.update(t, &local_pos, -thrust, FLYING).unwrap();
        }
        status
    }

    #[test]
    fn test_starts_from_prior_and_invalid() {
        let estimator = HoverThrustEstimator::default();
        assert_abs_diff_eq!(estimator.filter().hover_thrust(), 0.5);
        assert_abs_diff_eq!(estimator.filter().hover_thrust_var(), 0.01, epsilon = 1e-12);
        assert!(!estimator.status().valid);
    }

    #[test]
    fn test_learns_hover_thrust_and_becomes_valid() {
        let mut estimator = HoverThrustEstimator::default();
        let status = fly(&mut estimator, 0.6, 0, 1_000);

        assert_abs_diff_eq!(status.hover_thrust, 0.6, epsilon = 2e-3);
        assert!(status.hover_thrust_var < VALID_VARIANCE_MAX);
        assert!(status.valid);
    }

    #[test]
    fn test_validity_needs_hold_time() {
        let mut estimator = HoverThrustEstimator::default();
        // at 1.5 s the filter may already satisfy the checks, but not for 2 s
        let status = fly(&mut estimator, 0.5, 0, 75);
        assert!(!status.valid);
    }

    #[test]
    fn test_landing_resets_to_prior() {
        let mut estimator = HoverThrustEstimator::default();
        fly(&mut estimator, 0.6, 0, 1_000);

        let landed = VehicleLandState {
            armed: true,
            landed: true,
        };
        let local_pos = LocalPositionSample {
            time_us: 20_000_000,
            ..Default::default()
        };
        let status = estimator
            .update(20_000_000, &local_pos, -0.6, landed)
            .unwrap();

        assert_abs_diff_eq!(status.hover_thrust, 0.5);
        assert_abs_diff_eq!(status.hover_thrust_var, 0.01, epsilon = 1e-12);
        assert_abs_diff_eq!(status.accel_noise_var, 5.0);
        assert!(!status.valid);
    }

    #[test]
    fn test_fast_flight_inflates_noise() {
        let mut estimator = HoverThrustEstimator::default();
        let local_pos = LocalPositionSample {
            time_us: 20_000,
            accel_d: 0.0,
            velocity: Vector3::new(12.0, 0.0, -1.0),
            v_xy_valid: true,
            v_z_valid: true,
        };
        estimator.update(20_000, &local_pos, -0.5, FLYING).unwrap();
        assert_abs_diff_eq!(estimator.filter().measurement_noise_scale(), 3.0);

        // invalid velocity never inflates
        let local_pos = LocalPositionSample {
            v_xy_valid: false,
            time_us: 40_000,
            ..local_pos
        };
        estimator.update(40_000, &local_pos, -0.5, FLYING).unwrap();
        assert_abs_diff_eq!(estimator.filter().measurement_noise_scale(), 1.0);
    }

    #[test]
    fn test_no_thrust_skips_fusion() {
        let mut estimator = HoverThrustEstimator::default();
        let local_pos = LocalPositionSample {
            time_us: 20_000,
            accel_d: 3.0,
            ..Default::default()
        };
        estimator.update(20_000, &local_pos, 0.0, FLYING).unwrap();
        estimator
            .update(20_000, &local_pos, f64::NAN, FLYING)
            .unwrap();

        assert_abs_diff_eq!(estimator.filter().hover_thrust(), 0.5);
        assert!(!estimator.filter().last_outcome().fused);
    }

    #[test]
    fn test_bounds_follow_params() {
        let mut estimator = HoverThrustEstimator::default();
        estimator.set_params(HoverThrustParams {
            hover_thrust: 0.3,
            thrust_range: 0.05,
            ..Default::default()
        });
        estimator.reset();
        assert_abs_diff_eq!(estimator.filter().hover_thrust(), 0.3);

        // far more thrust than needed drives the estimate against the upper bound
        fly(&mut estimator, 0.8, 0, 500);
        assert!(estimator.filter().hover_thrust() <= 0.35 + 1e-12);
    }
}
