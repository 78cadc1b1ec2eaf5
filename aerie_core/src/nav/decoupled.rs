// aerie_core/src/nav/decoupled.rs

use nalgebra::{Rotation3, SVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::nav::{ImuSample, NavAxis, NavState, NavigationFilter};
use crate::types::{wrap_pi, ONE_G};

const VARIANCE_MIN: f64 = 1e-9;
const VARIANCE_MAX: f64 = 1e6;

/// Process noise of the decoupled filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NavProcessNoise {
    /// Accelerometer noise, in m/s^2.
    #[serde(default = "default_accel_noise")]
    pub accel_noise: f64,
    /// Gyroscope noise, in rad/s.
    #[serde(default = "default_gyro_noise")]
    pub gyro_noise: f64,
}

fn default_accel_noise() -> f64 {
    0.35
}
fn default_gyro_noise() -> f64 {
    0.015
}

impl Default for NavProcessNoise {
    fn default() -> Self {
        Self {
            accel_noise: default_accel_noise(),
            gyro_noise: default_gyro_noise(),
        }
    }
}

/// A navigation filter with nine independent scalar states.
///
/// Cross-covariances are not tracked: every state has its own variance and
/// every update touches exactly one state. This is enough to exercise the
/// aiding sources end to end without a coupled multi-state filter.
#[derive(Debug, Clone)]
pub struct DecoupledNavFilter {
    x: SVector<f64, { NavAxis::COUNT }>,
    p: SVector<f64, { NavAxis::COUNT }>,
    noise: NavProcessNoise,
}

impl DecoupledNavFilter {
    /// Creates a filter at the origin, level, with the given initial variances.
    pub fn new(noise: NavProcessNoise, position_var: f64, velocity_var: f64, attitude_var: f64) -> Self {
        let mut p = SVector::<f64, { NavAxis::COUNT }>::zeros();
        for axis in NavAxis::ALL {
            p[axis.index()] = match axis {
                NavAxis::PosN | NavAxis::PosE | NavAxis::PosD => position_var,
                NavAxis::VelN | NavAxis::VelE | NavAxis::VelD => velocity_var,
                NavAxis::Roll | NavAxis::Pitch | NavAxis::Yaw => attitude_var,
            };
        }

        Self {
            x: SVector::zeros(),
            p,
            noise,
        }
    }

    pub fn set_process_noise(&mut self, noise: NavProcessNoise) {
        self.noise = noise;
    }

    fn rotation_body_to_ned(&self) -> Rotation3<f64> {
        Rotation3::from_euler_angles(
            self.x[NavAxis::Roll.index()],
            self.x[NavAxis::Pitch.index()],
            self.x[NavAxis::Yaw.index()],
        )
    }

    fn vec3(v: &SVector<f64, { NavAxis::COUNT }>, first: NavAxis) -> Vector3<f64> {
        let i = first.index();
        Vector3::new(v[i], v[i + 1], v[i + 2])
    }

    fn clamp_variance(&mut self, axis: NavAxis) {
        let i = axis.index();
        self.p[i] = self.p[i].clamp(VARIANCE_MIN, VARIANCE_MAX);
    }
}

impl Default for DecoupledNavFilter {
    fn default() -> Self {
        Self::new(NavProcessNoise::default(), 100.0, 25.0, 0.25)
    }
}

impl NavigationFilter for DecoupledNavFilter {
    fn predict(&mut self, imu: &ImuSample, dt: f64) {
        if dt <= 0.0 {
            return;
        }

        // 1. Integrate the body rates directly into the Euler angles (small-angle approximation).
        for (k, axis) in [NavAxis::Roll, NavAxis::Pitch, NavAxis::Yaw].into_iter().enumerate() {
            let i = axis.index();
            self.x[i] = wrap_pi(self.x[i] + imu.gyro[k] * dt);
        }

        // 2. Rotate the specific force into NED and remove gravity.
        let accel_ned = self.rotation_body_to_ned() * imu.accel + Vector3::new(0.0, 0.0, ONE_G);

        // 3. Integrate velocity and position.
        for k in 0..3 {
            let ip = NavAxis::PosN.index() + k;
            let iv = NavAxis::VelN.index() + k;
            self.x[ip] += self.x[iv] * dt + 0.5 * accel_ned[k] * dt * dt;
            self.x[iv] += accel_ned[k] * dt;

            self.p[ip] += self.p[iv] * dt * dt;
            self.p[iv] += (self.noise.accel_noise * dt).powi(2);
        }

        for axis in [NavAxis::Roll, NavAxis::Pitch, NavAxis::Yaw] {
            self.p[axis.index()] += (self.noise.gyro_noise * dt).powi(2);
        }

        for axis in NavAxis::ALL {
            self.clamp_variance(axis);
        }
    }

    fn observe(&self, axis: NavAxis) -> (f64, f64) {
        (self.x[axis.index()], self.p[axis.index()])
    }

    fn fuse_axis(&mut self, axis: NavAxis, innovation: f64, innovation_variance: f64) -> bool {
        if !(innovation_variance > 0.0) || !innovation.is_finite() {
            return false;
        }

        let i = axis.index();
        let gain = self.p[i] / innovation_variance;

        self.x[i] += gain * innovation;
        if axis.is_angle() {
            self.x[i] = wrap_pi(self.x[i]);
        }
        self.p[i] *= 1.0 - gain;
        self.clamp_variance(axis);

        true
    }

    fn reset_axis(&mut self, axis: NavAxis, value: f64, variance: f64) {
        let i = axis.index();
        self.x[i] = if axis.is_angle() { wrap_pi(value) } else { value };
        self.p[i] = variance;
        self.clamp_variance(axis);
    }

    fn state(&self) -> NavState {
        NavState {
            position: Self::vec3(&self.x, NavAxis::PosN),
            velocity: Self::vec3(&self.x, NavAxis::VelN),
            attitude: Self::vec3(&self.x, NavAxis::Roll),
            position_var: Self::vec3(&self.p, NavAxis::PosN),
            velocity_var: Self::vec3(&self.p, NavAxis::VelN),
            attitude_var: Self::vec3(&self.p, NavAxis::Roll),
        }
    }
}
