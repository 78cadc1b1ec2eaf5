// aerie_sim/src/simulation/sensors/vision.rs

use aerie_core::aid::sources::VisionSample;
use aerie_core::types::{wrap_pi, Sample, TimeUs};
use nalgebra::Vector3;
use rand_distr::{Distribution, Normal};

use super::SampleSchedule;
use crate::simulation::config::{FaultConfig, VisionConfig};
use crate::simulation::core::prng::SimulationRng;
use crate::simulation::core::truth::TruthState;
use crate::simulation::error::SimError;

#[derive(Debug, Clone)]
pub struct VisionSensor {
    schedule: SampleSchedule<VisionSample>,
    position_noise: Normal<f64>,
    velocity_noise: Normal<f64>,
    yaw_noise: Normal<f64>,
    config: VisionConfig,
}

impl VisionSensor {
    pub fn new(config: &VisionConfig) -> Result<Self, SimError> {
        Ok(Self {
            schedule: SampleSchedule::new(config.rate, config.latency_ms),
            position_noise: super::zero_mean(config.position_noise_stddev, "vision position")?,
            velocity_noise: super::zero_mean(config.velocity_noise_stddev, "vision velocity")?,
            yaw_noise: super::zero_mean(config.yaw_noise_stddev, "vision yaw")?,
            config: config.clone(),
        })
    }

    /// Takes a reading if one is due, then returns everything delivered by `now_us`.
    pub fn step(
        &mut self,
        now_us: TimeUs,
        truth: &TruthState,
        faults: &[FaultConfig],
        rng: &mut SimulationRng,
    ) -> Vec<Sample<VisionSample>> {
        if self.schedule.is_due(now_us) {
            let mut dropped = false;
            let mut quality = self.config.quality;
            for fault in faults.iter().filter(|f| f.is_active(truth.time_seconds)) {
                match fault {
                    FaultConfig::VisionDropout { .. } => dropped = true,
                    FaultConfig::VisionLowQuality { quality: q, .. } => quality = *q,
                    FaultConfig::GnssHeightStep { .. } => {}
                }
            }

            if !dropped {
                let sample = self.measure(truth, quality, rng);
                self.schedule.send(Sample::new(now_us, sample));
            }
        }
        self.schedule.receive(now_us)
    }

    fn measure(&self, truth: &TruthState, quality: u8, rng: &mut SimulationRng) -> VisionSample {
        let pos_noise = Vector3::from_fn(|_, _| self.position_noise.sample(&mut rng.0));
        let vel_noise = Vector3::from_fn(|_, _| self.velocity_noise.sample(&mut rng.0));
        let pos_var = self.config.position_noise_stddev.powi(2);
        let vel_var = self.config.velocity_noise_stddev.powi(2);

        VisionSample {
            position: truth.position + pos_noise,
            velocity: truth.velocity + vel_noise,
            yaw: wrap_pi(truth.yaw + self.yaw_noise.sample(&mut rng.0)),
            position_var: Vector3::repeat(pos_var),
            velocity_var: Vector3::repeat(vel_var),
            yaw_var: self.config.yaw_noise_stddev.powi(2),
            quality,
        }
    }
}
