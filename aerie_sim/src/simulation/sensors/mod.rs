// aerie_sim/src/simulation/sensors/mod.rs

//! Simulated sensors. Each one samples the truth on its own schedule and
//! hands the reading over only after its transport latency has elapsed.

pub mod gnss;
pub mod imu;
pub mod vision;

use std::collections::VecDeque;

use aerie_core::types::{Sample, TimeUs};
use rand_distr::Normal;

use crate::simulation::error::SimError;

pub use gnss::GnssSensor;
pub use imu::ImuSensor;
pub use vision::VisionSensor;

/// Converts a rate in Hz to a sampling period in microseconds.
pub fn period_us(rate: f64) -> TimeUs {
    (1e6 / rate).round().max(1.0) as TimeUs
}

/// A zero-mean normal distribution, rejecting invalid deviations.
pub fn zero_mean(std_dev: f64, what: &str) -> Result<Normal<f64>, SimError> {
    Normal::new(0.0, std_dev)
        .map_err(|e| SimError::InvalidScenario(format!("{what} noise: {e}")))
}

/// Fixed-rate sampling plus a fixed-latency delivery queue.
#[derive(Debug, Clone)]
pub struct SampleSchedule<T> {
    period_us: TimeUs,
    latency_us: TimeUs,
    next_sample_us: TimeUs,
    in_flight: VecDeque<(TimeUs, Sample<T>)>,
}

impl<T> SampleSchedule<T> {
    pub fn new(rate: f64, latency_ms: f64) -> Self {
        Self {
            period_us: period_us(rate),
            latency_us: (latency_ms.max(0.0) * 1e3).round() as TimeUs,
            next_sample_us: 0,
            in_flight: VecDeque::new(),
        }
    }

    /// True once per period; advances the schedule when it fires.
    pub fn is_due(&mut self, now_us: TimeUs) -> bool {
        if now_us < self.next_sample_us {
            return false;
        }
        self.next_sample_us += self.period_us;
        true
    }

    /// Queues a reading taken at `sample.time_us`.
    pub fn send(&mut self, sample: Sample<T>) {
        let deliver_at = sample.time_us + self.latency_us;
        self.in_flight.push_back((deliver_at, sample));
    }

    /// Readings whose latency has elapsed by `now_us`, oldest first.
    pub fn receive(&mut self, now_us: TimeUs) -> Vec<Sample<T>> {
        let mut delivered = Vec::new();
        while self
            .in_flight
            .front()
            .map_or(false, |(deliver_at, _)| *deliver_at <= now_us)
        {
            if let Some((_, sample)) = self.in_flight.pop_front() {
                delivered.push(sample);
            }
        }
        delivered
    }
}
