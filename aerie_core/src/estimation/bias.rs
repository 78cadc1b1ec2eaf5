// aerie_core/src/estimation/bias.rs

use serde::Serialize;

use crate::error::FusionError;
use crate::estimation::lowpass::AlphaFilter;
use crate::estimation::{innovation_test_ratio, is_test_ratio_passing, DIVERGENCE_TEST_RATIO_THRESHOLD};

/// Time constant of the innovation sequence monitor, in seconds.
const INNOV_SEQUENCE_MONITORING_TIME_CONSTANT: f64 = 10.0;
const PROCESS_VAR_BOOST_GAIN: f64 = 1.0e3;
const STATE_VARIANCE_MIN: f64 = 1e-8;
const MEASUREMENT_VARIANCE_MIN: f64 = 0.01 * 0.01;

/// Snapshot published after every bias fusion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BiasStatus {
    pub bias: f64,
    pub bias_var: f64,
    pub innov: f64,
    pub innov_var: f64,
    pub innov_test_ratio: f64,
}

impl Default for BiasStatus {
    fn default() -> Self {
        Self {
            bias: 0.0,
            bias_var: 0.0,
            innov: 0.0,
            innov_var: 0.0,
            innov_test_ratio: f64::INFINITY,
        }
    }
}

/// One-state estimator of a slowly varying sensor offset (e.g. GNSS height bias).
///
/// An offset is suspected when the low-passed signed test ratio is large or
/// when the innovation keeps the same sign for too long; the process noise is
/// then boosted until the offset is absorbed.
#[derive(Debug, Clone)]
pub struct BiasEstimator {
    state: f64,
    state_var: f64,
    dt: f64,
    gate_size: f64,
    /// Process power spectral density, in (unit/s)^2 / Hz.
    process_psd: f64,
    state_var_max: f64,

    signed_innov_test_ratio_lpf: AlphaFilter<f64>,
    time_since_last_negative_innov: f64,
    time_since_last_positive_innov: f64,

    fusion_active: bool,
    status: BiasStatus,
}

impl Default for BiasEstimator {
    fn default() -> Self {
        Self::new(0.0, 0.1)
    }
}

impl BiasEstimator {
    pub fn new(state_init: f64, state_var_init: f64) -> Self {
        let dt = 0.01;
        Self {
            state: state_init,
            state_var: state_var_init,
            dt,
            gate_size: 3.0,
            process_psd: 1.25e-6,
            state_var_max: 2.0,
            signed_innov_test_ratio_lpf: AlphaFilter::from_time_constant(
                dt,
                INNOV_SEQUENCE_MONITORING_TIME_CONSTANT,
            ),
            time_since_last_negative_innov: 0.0,
            time_since_last_positive_innov: 0.0,
            fusion_active: false,
            status: BiasStatus::default(),
        }
    }

    pub fn reset(&mut self) {
        self.state = 0.0;
        self.state_var = 0.0;
        self.signed_innov_test_ratio_lpf.reset(0.0);
        self.time_since_last_negative_innov = 0.0;
        self.time_since_last_positive_innov = 0.0;
    }

    pub fn predict(&mut self, dt: f64) {
        let mut delta_state_var = self.process_psd * dt;

        if self.is_offset_detected() {
            // boost the process noise until the offset is removed
            delta_state_var *= PROCESS_VAR_BOOST_GAIN;
        }

        self.state_var += delta_state_var;
        self.constrain_state_var();

        if dt > f64::EPSILON && (self.dt - dt).abs() > 0.001 {
            self.signed_innov_test_ratio_lpf
                .set_parameters(dt, INNOV_SEQUENCE_MONITORING_TIME_CONSTANT);
            self.dt = dt;
        }

        self.status.bias_var = self.state_var;
    }

    pub fn fuse_bias(
        &mut self,
        measurement: f64,
        measurement_var: f64,
    ) -> Result<BiasStatus, FusionError> {
        if !measurement.is_finite() || !measurement_var.is_finite() {
            return Err(FusionError::NonFinite {
                what: "bias measurement",
            });
        }

        let innov_var = self.state_var + measurement_var.max(MEASUREMENT_VARIANCE_MIN);
        let innov = measurement - self.state;
        let gain = self.state_var / innov_var;
        let innov_test_ratio = innovation_test_ratio(innov, innov_var, self.gate_size);

        if is_test_ratio_passing(innov_test_ratio) {
            self.state += gain * innov;
            self.state_var -= gain * self.state_var;
            self.constrain_state_var();
        }

        self.update_offset_detection(innov, innov_test_ratio);

        self.status = BiasStatus {
            bias: self.state,
            bias_var: self.state_var,
            innov,
            innov_var,
            innov_test_ratio,
        };

        Ok(self.status)
    }

    // --- Accessors & Setters ---

    pub fn bias(&self) -> f64 {
        self.state
    }

    pub fn bias_var(&self) -> f64 {
        self.state_var
    }

    pub fn status(&self) -> &BiasStatus {
        &self.status
    }

    pub fn set_bias(&mut self, bias: f64) {
        self.state = bias;
    }

    pub fn set_process_noise_spectral_density(&mut self, nsd: f64) {
        self.process_psd = nsd * nsd;
    }

    pub fn set_bias_std_dev(&mut self, std_dev: f64) {
        self.state_var = std_dev * std_dev;
    }

    pub fn set_innov_gate(&mut self, gate_size: f64) {
        self.gate_size = gate_size;
    }

    pub fn set_max_state_noise(&mut self, max_noise: f64) {
        self.state_var_max = (max_noise * max_noise).max(0.01 * 0.01);
    }

    pub fn set_fusion_active(&mut self, active: bool) {
        self.fusion_active = active;
    }

    pub fn is_fusion_active(&self) -> bool {
        self.fusion_active
    }

    // --- Private Helper Methods ---

    fn constrain_state_var(&mut self) {
        self.state_var = self.state_var.clamp(STATE_VARIANCE_MIN, self.state_var_max);
    }

    fn update_offset_detection(&mut self, innov: f64, innov_test_ratio: f64) {
        let signed_innov_test_ratio = innov.signum() * innov_test_ratio;
        self.signed_innov_test_ratio_lpf
            .update(signed_innov_test_ratio.clamp(-1.0, 1.0));

        if innov > 0.0 {
            self.time_since_last_positive_innov = 0.0;
            self.time_since_last_negative_innov += self.dt;
        } else {
            self.time_since_last_negative_innov = 0.0;
            self.time_since_last_positive_innov += self.dt;
        }
    }

    fn is_offset_detected(&self) -> bool {
        // either the average innovation is statistically too large or its sign never changes
        self.signed_innov_test_ratio_lpf.state().abs() > DIVERGENCE_TEST_RATIO_THRESHOLD
            || self.time_since_last_positive_innov > INNOV_SEQUENCE_MONITORING_TIME_CONSTANT
            || self.time_since_last_negative_innov > INNOV_SEQUENCE_MONITORING_TIME_CONSTANT
    }
}
