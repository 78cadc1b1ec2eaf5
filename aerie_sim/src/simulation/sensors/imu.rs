// aerie_sim/src/simulation/sensors/imu.rs

use aerie_core::nav::ImuSample;
use nalgebra::Vector3;
use rand_distr::{Distribution, Normal};

use crate::simulation::config::structs::Simulation;
use crate::simulation::core::prng::SimulationRng;
use crate::simulation::core::truth::TruthState;
use crate::simulation::error::SimError;

/// The IMU drives the estimator clock, so it has no schedule of its own.
#[derive(Debug, Clone)]
pub struct ImuSensor {
    accel_noise: Normal<f64>,
    gyro_noise: Normal<f64>,
}

impl ImuSensor {
    pub fn new(config: &Simulation) -> Result<Self, SimError> {
        Ok(Self {
            accel_noise: super::zero_mean(config.accel_noise_stddev, "accelerometer")?,
            gyro_noise: super::zero_mean(config.gyro_noise_stddev, "gyro")?,
        })
    }

    pub fn measure(&self, truth: &TruthState, rng: &mut SimulationRng) -> ImuSample {
        let accel_noise = Vector3::from_fn(|_, _| self.accel_noise.sample(&mut rng.0));
        let gyro_noise = Vector3::from_fn(|_, _| self.gyro_noise.sample(&mut rng.0));
        ImuSample {
            accel: truth.specific_force_body() + accel_noise,
            gyro: gyro_noise,
        }
    }
}
