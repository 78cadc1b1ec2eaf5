// aerie_core/src/estimation/hover_thrust.rs

//! One-state adaptive Kalman filter estimating the collective thrust needed to hover.
//!
//! The state is assumed constant between updates. The measurement is the
//! vertical acceleration, predicted from the commanded thrust as
//! `a_z = g * thrust / hover_thrust - g`. The filter learns its own measurement
//! noise and inflates its variance when the gate keeps rejecting data with a
//! consistent sign, so it can recover from a sudden change in hover thrust.

use crate::error::FusionError;
use crate::estimation::lowpass::AlphaFilter;
use crate::estimation::{
    innovation_test_ratio, is_test_ratio_passing, FuseOutcome, DIVERGENCE_TEST_RATIO_THRESHOLD,
};
use crate::types::ONE_G;

pub const STATE_VARIANCE_MIN: f64 = 1e-10;
pub const STATE_VARIANCE_MAX: f64 = 1.0;
pub const ACCEL_VARIANCE_MIN: f64 = 1.0;
pub const ACCEL_VARIANCE_MAX: f64 = 400.0;
pub const DEFAULT_ACCEL_VARIANCE: f64 = 5.0;
const VARIANCE_BUMP_GAIN: f64 = 1e3;

#[derive(Debug, Clone)]
pub struct HoverThrustFilter {
    hover_thrust: f64,
    state_var: f64,
    /// Process noise density, in thrust^2 / s^2.
    process_var: f64,
    /// Learned vertical acceleration variance, in (m/s^2)^2.
    acc_var: f64,
    acc_var_scale: f64,
    gate_size: f64,
    hover_thrust_min: f64,
    hover_thrust_max: f64,
    noise_learning_time_constant: f64,
    lpf_time_constant: f64,
    dt: f64,

    residual_lpf: AlphaFilter<f64>,
    signed_innov_test_ratio_lpf: AlphaFilter<f64>,

    last_outcome: FuseOutcome,
}

impl Default for HoverThrustFilter {
    fn default() -> Self {
        Self {
            hover_thrust: 0.5,
            state_var: 0.01,
            process_var: 12.5e-6,
            acc_var: DEFAULT_ACCEL_VARIANCE,
            acc_var_scale: 1.0,
            gate_size: 3.0,
            hover_thrust_min: 0.1,
            hover_thrust_max: 0.9,
            noise_learning_time_constant: 2.0,
            lpf_time_constant: 1.0,
            dt: 0.02,
            residual_lpf: AlphaFilter::default(),
            signed_innov_test_ratio_lpf: AlphaFilter::default(),
            last_outcome: FuseOutcome::default(),
        }
    }
}

impl HoverThrustFilter {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Prediction & Update ---

    /// Propagates the variance over `dt` seconds; the state itself is constant.
    pub fn predict(&mut self, dt: f64) -> Result<(), FusionError> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(FusionError::InvalidTimeStep { dt });
        }

        self.state_var = (self.state_var + self.process_var * dt * dt)
            .clamp(STATE_VARIANCE_MIN, STATE_VARIANCE_MAX);
        self.dt = dt;
        Ok(())
    }

    /// Fuses one vertical acceleration measurement (m/s^2, positive up) taken
    /// while `thrust` (normalized, positive up) was commanded.
    pub fn fuse(&mut self, acc_z: f64, thrust: f64) -> Result<FuseOutcome, FusionError> {
        if !acc_z.is_finite() {
            return Err(FusionError::NonFinite {
                what: "vertical acceleration",
            });
        }
        if !thrust.is_finite() {
            return Err(FusionError::NonFinite { what: "thrust" });
        }

        let h = self.compute_h(thrust);
        let innov_var = self.compute_innov_var(h);
        let innov = self.compute_innov(acc_z, thrust);
        let gain = self.state_var * h / innov_var;
        let test_ratio = innovation_test_ratio(innov, innov_var, self.gate_size);

        let mut residual = innov;
        let mut fused = false;
        let mut variance_bumped = false;

        if is_test_ratio_passing(test_ratio) {
            self.update_state(gain, innov);
            self.update_state_covariance(gain, h);
            // the estimate moved, so the residual differs from the innovation
            residual = self.compute_innov(acc_z, thrust);
            fused = true;
        } else if self.is_large_offset_detected() {
            // Every measurement has been rejected for a while with the same sign:
            // the hover thrust changed suddenly or the filter is diverging.
            self.bump_state_variance();
            variance_bumped = true;
        }

        let signed_innov_test_ratio = innov.signum() * test_ratio;
        self.update_lpf(residual, signed_innov_test_ratio);
        self.update_measurement_noise(residual, h);

        self.last_outcome = FuseOutcome {
            innovation: innov,
            innovation_variance: innov_var,
            test_ratio,
            residual,
            fused,
            variance_bumped,
        };

        Ok(self.last_outcome)
    }

    // --- Accessors ---

    pub fn hover_thrust(&self) -> f64 {
        self.hover_thrust
    }

    pub fn hover_thrust_var(&self) -> f64 {
        self.state_var
    }

    pub fn measurement_variance(&self) -> f64 {
        self.acc_var
    }

    pub fn measurement_noise_scale(&self) -> f64 {
        self.acc_var_scale
    }

    pub fn gate_size(&self) -> f64 {
        self.gate_size
    }

    pub fn last_outcome(&self) -> &FuseOutcome {
        &self.last_outcome
    }

    // --- Configuration ---

    pub fn set_hover_thrust(&mut self, hover_thrust: f64) {
        self.hover_thrust = hover_thrust.clamp(self.hover_thrust_min, self.hover_thrust_max);
    }

    pub fn set_hover_thrust_std_dev(&mut self, std_dev: f64) {
        self.state_var = (std_dev * std_dev).clamp(STATE_VARIANCE_MIN, STATE_VARIANCE_MAX);
    }

    pub fn set_hover_thrust_var(&mut self, variance: f64) {
        self.state_var = variance.clamp(STATE_VARIANCE_MIN, STATE_VARIANCE_MAX);
    }

    pub fn set_process_noise_std_dev(&mut self, std_dev: f64) {
        self.process_var = std_dev * std_dev;
    }

    pub fn set_measurement_variance(&mut self, variance: f64) {
        self.acc_var = variance;
    }

    pub fn set_measurement_noise_scale(&mut self, scale: f64) {
        self.acc_var_scale = scale;
    }

    pub fn set_gate_size(&mut self, gate_size: f64) {
        self.gate_size = gate_size;
    }

    pub fn set_min_hover_thrust(&mut self, thrust: f64) {
        self.hover_thrust_min = thrust;
    }

    pub fn set_max_hover_thrust(&mut self, thrust: f64) {
        self.hover_thrust_max = thrust;
    }

    pub fn reset_accel_noise(&mut self) {
        self.acc_var = DEFAULT_ACCEL_VARIANCE;
    }

    /// Clears the learned innovation statistics.
    pub fn reset_lpf(&mut self) {
        self.residual_lpf.reset(0.0);
        self.signed_innov_test_ratio_lpf.reset(0.0);
    }

    // --- Private Helper Methods ---

    fn compute_h(&self, thrust: f64) -> f64 {
        -ONE_G * thrust / (self.hover_thrust * self.hover_thrust)
    }

    fn compute_innov_var(&self, h: f64) -> f64 {
        let r = self.acc_var * self.acc_var_scale;
        (h * self.state_var * h + r).max(r)
    }

    fn compute_innov(&self, acc_z: f64, thrust: f64) -> f64 {
        acc_z - self.compute_predicted_acc_z(thrust)
    }

    fn compute_predicted_acc_z(&self, thrust: f64) -> f64 {
        ONE_G * thrust / self.hover_thrust - ONE_G
    }

    fn update_state(&mut self, gain: f64, innov: f64) {
        self.hover_thrust =
            (self.hover_thrust + gain * innov).clamp(self.hover_thrust_min, self.hover_thrust_max);
    }

    fn update_state_covariance(&mut self, gain: f64, h: f64) {
        self.state_var =
            ((1.0 - gain * h) * self.state_var).clamp(STATE_VARIANCE_MIN, STATE_VARIANCE_MAX);
    }

    fn is_large_offset_detected(&self) -> bool {
        self.signed_innov_test_ratio_lpf.state().abs() > DIVERGENCE_TEST_RATIO_THRESHOLD
    }

    fn bump_state_variance(&mut self) {
        self.state_var = (self.state_var + VARIANCE_BUMP_GAIN * self.process_var * self.dt * self.dt)
            .clamp(STATE_VARIANCE_MIN, STATE_VARIANCE_MAX);
    }

    fn update_lpf(&mut self, residual: f64, signed_innov_test_ratio: f64) {
        self.residual_lpf.set_parameters(self.dt, self.lpf_time_constant);
        self.residual_lpf.update(residual);

        self.signed_innov_test_ratio_lpf
            .set_parameters(self.dt, self.lpf_time_constant);
        self.signed_innov_test_ratio_lpf
            .update(signed_innov_test_ratio.clamp(-1.0, 1.0));
    }

    fn update_measurement_noise(&mut self, residual: f64, h: f64) {
        let alpha = self.dt / (self.noise_learning_time_constant + self.dt);
        // remove the slowly varying part so an estimation bias is not learned as noise
        let res_no_bias = residual - self.residual_lpf.state();
        let p = self.state_var;
        self.acc_var = ((1.0 - alpha) * self.acc_var + alpha * (res_no_bias * res_no_bias + h * p * h))
            .clamp(ACCEL_VARIANCE_MIN, ACCEL_VARIANCE_MAX);
    }
}
