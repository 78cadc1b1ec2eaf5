// aerie_sim/src/simulation/sensors/gnss.rs

use aerie_core::aid::sources::GnssSample;
use aerie_core::types::{Sample, TimeUs};
use rand_distr::{Distribution, Normal};

use super::SampleSchedule;
use crate::simulation::config::{FaultConfig, GnssConfig};
use crate::simulation::core::prng::SimulationRng;
use crate::simulation::core::truth::TruthState;
use crate::simulation::error::SimError;

/// Reported speed accuracy, in m/s.
const SPEED_ACCURACY: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct GnssSensor {
    schedule: SampleSchedule<GnssSample>,
    height_noise: Normal<f64>,
    config: GnssConfig,
}

impl GnssSensor {
    pub fn new(config: &GnssConfig) -> Result<Self, SimError> {
        Ok(Self {
            schedule: SampleSchedule::new(config.rate, config.latency_ms),
            height_noise: super::zero_mean(config.height_noise_stddev, "GNSS height")?,
            config: config.clone(),
        })
    }

    pub fn step(
        &mut self,
        now_us: TimeUs,
        truth: &TruthState,
        faults: &[FaultConfig],
        rng: &mut SimulationRng,
    ) -> Vec<Sample<GnssSample>> {
        if self.schedule.is_due(now_us) {
            let offset: f64 = faults
                .iter()
                .filter(|f| f.is_active(truth.time_seconds))
                .map(|f| match f {
                    FaultConfig::GnssHeightStep { offset, .. } => *offset,
                    _ => 0.0,
                })
                .sum();

            let sample = GnssSample {
                height: self.config.origin_altitude - truth.position.z
                    + offset
                    + self.height_noise.sample(&mut rng.0),
                vacc: self.config.height_noise_stddev,
                vel_d: truth.velocity.z,
                sacc: SPEED_ACCURACY,
                fix_type: self.config.fix_type,
            };
            self.schedule.send(Sample::new(now_us, sample));
        }
        self.schedule.receive(now_us)
    }
}
