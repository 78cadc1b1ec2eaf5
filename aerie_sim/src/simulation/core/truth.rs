// aerie_sim/src/simulation/core/truth.rs

//! The vehicle's true motion, from which every sensor reading is derived.

use aerie_core::types::ONE_G;
use nalgebra::Vector3;
use std::f64::consts::TAU;

use crate::simulation::config::Flight;

/// True kinematic state at one instant, NED.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TruthState {
    pub time_seconds: f64,
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub acceleration: Vector3<f64>,
    pub yaw: f64,
    pub in_air: bool,
}

impl TruthState {
    /// Accelerometer reading of a level vehicle, body FRD.
    pub fn specific_force_body(&self) -> Vector3<f64> {
        let f_ned = self.acceleration - Vector3::new(0.0, 0.0, ONE_G);
        let (s, c) = self.yaw.sin_cos();
        Vector3::new(c * f_ned.x + s * f_ned.y, -s * f_ned.x + c * f_ned.y, f_ned.z)
    }

    /// The collective thrust that produces the current vertical acceleration.
    pub fn thrust(&self, hover_thrust: f64) -> f64 {
        hover_thrust * (ONE_G - self.acceleration.z) / ONE_G
    }
}

/// Evaluates the configured flight profile.
#[derive(Debug, Clone)]
pub struct TruthModel {
    flight: Flight,
}

impl TruthModel {
    pub fn new(flight: Flight) -> Self {
        Self { flight }
    }

    pub fn flight(&self) -> &Flight {
        &self.flight
    }

    pub fn state_at(&self, time_seconds: f64) -> TruthState {
        let yaw = self.flight.yaw_deg.to_radians();
        let airborne_for = time_seconds - self.flight.takeoff_seconds;
        if airborne_for < 0.0 {
            return TruthState {
                time_seconds,
                position: Vector3::zeros(),
                velocity: Vector3::zeros(),
                acceleration: Vector3::zeros(),
                yaw,
                in_air: false,
            };
        }

        // pos_d = a (cos(wt) - 1): starts at rest on the ground, rises up to 2a
        let a = self.flight.oscillation_amplitude;
        let w = TAU / self.flight.oscillation_period;
        let (s, c) = (w * airborne_for).sin_cos();
        TruthState {
            time_seconds,
            position: Vector3::new(0.0, 0.0, a * (c - 1.0)),
            velocity: Vector3::new(0.0, 0.0, -a * w * s),
            acceleration: Vector3::new(0.0, 0.0, -a * w * w * c),
            yaw,
            in_air: true,
        }
    }
}
