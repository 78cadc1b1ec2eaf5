// aerie_core/src/types.rs

use nalgebra::SVector;
use serde::{Deserialize, Serialize};

// --- Core Type Aliases ---
/// Monotonic time in microseconds, as produced by the collaborator clock.
pub type TimeUs = u64;

/// Standard gravity in m/s^2.
pub const ONE_G: f64 = 9.80665;

/// A timestamped measurement, immutable once stored in a buffer.
///
/// Producers must hand samples over with non-decreasing `time_us`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Sample<T> {
    pub time_us: TimeUs,
    pub payload: T,
}

impl<T> Sample<T> {
    pub fn new(time_us: TimeUs, payload: T) -> Self {
        Self { time_us, payload }
    }
}

// --- Core Trait for Input Validation ---
/// Anything that can be checked for NaN/inf before it enters the estimator.
pub trait Finite {
    fn is_finite(&self) -> bool;
}

impl Finite for f64 {
    fn is_finite(&self) -> bool {
        f64::is_finite(*self)
    }
}

impl Finite for f32 {
    fn is_finite(&self) -> bool {
        f32::is_finite(*self)
    }
}

impl<const N: usize> Finite for SVector<f64, N> {
    fn is_finite(&self) -> bool {
        self.iter().all(|v| v.is_finite())
    }
}

impl<T: Finite> Finite for Sample<T> {
    fn is_finite(&self) -> bool {
        self.payload.is_finite()
    }
}

/// Returns true once `timeout_us` has elapsed since `last_us`, evaluated at `now_us`.
///
/// A `last_us` in the future (clock jump or reset) also counts as timed out.
pub fn is_timed_out(last_us: TimeUs, timeout_us: u64, now_us: TimeUs) -> bool {
    last_us > now_us || last_us.saturating_add(timeout_us) < now_us
}

/// Wraps an angle to [-pi, pi).
pub fn wrap_pi(angle: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    if (-PI..PI).contains(&angle) {
        return angle;
    }
    (angle + PI).rem_euclid(TAU) - PI
}
