// aerie_core/src/nav/mod.rs

//! The seam between the aiding-source controllers and the navigation filter
//! they correct.

use dyn_clone::DynClone;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::types::Finite;

pub mod decoupled;

/// Every scalar state an aiding source can observe or reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NavAxis {
    // --- NED Position ---
    PosN,
    PosE,
    PosD,
    // --- NED Velocity ---
    VelN,
    VelE,
    VelD,
    // --- Euler Attitude (body FRD from NED) ---
    Roll,
    Pitch,
    Yaw,
}

impl NavAxis {
    pub const COUNT: usize = 9;

    pub const ALL: [NavAxis; NavAxis::COUNT] = [
        NavAxis::PosN,
        NavAxis::PosE,
        NavAxis::PosD,
        NavAxis::VelN,
        NavAxis::VelE,
        NavAxis::VelD,
        NavAxis::Roll,
        NavAxis::Pitch,
        NavAxis::Yaw,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Angles wrap at +-pi, both in the state and in the innovation.
    pub fn is_angle(self) -> bool {
        matches!(self, NavAxis::Roll | NavAxis::Pitch | NavAxis::Yaw)
    }
}

/// A delayed inertial sample used to propagate the navigation filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    /// Specific force in the body FRD frame, in m/s^2.
    pub accel: Vector3<f64>,
    /// Angular rate in the body FRD frame, in rad/s.
    pub gyro: Vector3<f64>,
}

impl ImuSample {
    pub fn at_rest() -> Self {
        Self {
            accel: Vector3::new(0.0, 0.0, -crate::types::ONE_G),
            gyro: Vector3::zeros(),
        }
    }
}

impl Finite for ImuSample {
    fn is_finite(&self) -> bool {
        self.accel.is_finite() && self.gyro.is_finite()
    }
}

/// Publish-ready copy of the navigation state and its per-state variance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NavState {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    /// Roll, pitch, yaw in radians.
    pub attitude: Vector3<f64>,
    pub position_var: Vector3<f64>,
    pub velocity_var: Vector3<f64>,
    pub attitude_var: Vector3<f64>,
}

// --- NAVIGATION FILTER TRAIT ---
/// The navigation filter the aiding sources feed. Each call works on one
/// scalar state, which is all the sequential fusion pattern needs.
pub trait NavigationFilter: DynClone + Debug + Send + Sync {
    /// Propagates the state over `dt` seconds with one inertial sample.
    fn predict(&mut self, imu: &ImuSample, dt: f64);

    /// Returns the current value and variance of one state.
    fn observe(&self, axis: NavAxis) -> (f64, f64);

    /// Applies a scalar Kalman update for an already-gated innovation.
    /// Returns `false` when the update could not be applied.
    fn fuse_axis(&mut self, axis: NavAxis, innovation: f64, innovation_variance: f64) -> bool;

    /// Overwrites one state and its variance.
    fn reset_axis(&mut self, axis: NavAxis, value: f64, variance: f64);

    fn state(&self) -> NavState;
}

// This macro automatically generates the implementation of `Clone` for `Box<dyn NavigationFilter>`.
dyn_clone::clone_trait_object!(NavigationFilter);
