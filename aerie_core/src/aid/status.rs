// aerie_core/src/aid/status.rs

use nalgebra::SVector;
use serde::Serialize;

use crate::estimation::{innovation_test_ratio, is_test_ratio_passing};
use crate::types::TimeUs;

/// Per-source diagnostic record, one axis per observed state.
///
/// Written by the controller every cycle the source is evaluated, whether or
/// not fusion happens, so the reason a source is rejected stays observable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AidSourceStatus<const N: usize> {
    pub timestamp_sample: TimeUs,
    pub observation: SVector<f64, N>,
    pub observation_variance: SVector<f64, N>,
    pub innovation: SVector<f64, N>,
    pub innovation_variance: SVector<f64, N>,
    /// Largest per-axis test ratio.
    pub test_ratio: f64,
    pub rejected: bool,
    /// The controller allowed fusion this cycle and the gate passed.
    pub fusion_enabled: bool,
    pub fused: bool,
    pub time_last_fuse: TimeUs,
}

impl<const N: usize> Default for AidSourceStatus<N> {
    fn default() -> Self {
        Self {
            timestamp_sample: 0,
            observation: SVector::zeros(),
            observation_variance: SVector::zeros(),
            innovation: SVector::zeros(),
            innovation_variance: SVector::zeros(),
            test_ratio: 0.0,
            rejected: false,
            fusion_enabled: false,
            fused: false,
            time_last_fuse: 0,
        }
    }
}

impl<const N: usize> AidSourceStatus<N> {
    /// Zeroes every field.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Records a new observation and its gating result.
    ///
    /// `fused` is cleared; it is only set again by a successful fusion.
    pub fn update(
        &mut self,
        timestamp_sample: TimeUs,
        observation: SVector<f64, N>,
        observation_variance: SVector<f64, N>,
        innovation: SVector<f64, N>,
        innovation_variance: SVector<f64, N>,
        gate_size: f64,
    ) {
        self.timestamp_sample = timestamp_sample;
        self.observation = observation;
        self.observation_variance = observation_variance;
        self.innovation = innovation;
        self.innovation_variance = innovation_variance;

        self.test_ratio = innovation
            .iter()
            .zip(innovation_variance.iter())
            .map(|(innov, var)| innovation_test_ratio(*innov, *var, gate_size))
            // f64::max would swallow a NaN axis
            .fold(0.0_f64, |worst, ratio| {
                if worst.is_nan() || ratio.is_nan() {
                    f64::NAN
                } else {
                    worst.max(ratio)
                }
            });

        self.rejected = !is_test_ratio_passing(self.test_ratio);
        self.fused = false;
    }
}
