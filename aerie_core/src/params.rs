// aerie_core/src/params.rs

//! Tunable parameters, supplied at construction and again on change notification.
//!
//! Every field has a serde default so a configuration file only has to name
//! what it overrides.

use serde::{Deserialize, Serialize};

use crate::buffer::DEFAULT_ACCEPT_WINDOW_US;
use crate::nav::decoupled::NavProcessNoise;

/// Which sensor the vertical position is referenced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HeightRef {
    #[default]
    Gnss,
    Vision,
}

/// Bits of [`EstimatorParams::ev_ctrl`].
pub mod ev_ctrl {
    pub const HPOS: u8 = 1 << 0;
    pub const VPOS: u8 = 1 << 1;
    pub const VEL: u8 = 1 << 2;
    pub const YAW: u8 = 1 << 3;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EstimatorParams {
    // --- Timing & Buffers ---
    /// How far behind the newest IMU sample the fusion horizon trails, in us.
    #[serde(default = "default_fusion_delay_us")]
    pub fusion_delay_us: u64,
    /// Width of the `[t, t + window)` bracket a buffered sample answers for, in us.
    #[serde(default = "default_sample_accept_window_us")]
    pub sample_accept_window_us: u64,
    #[serde(default = "default_imu_buffer_len")]
    pub imu_buffer_len: usize,
    #[serde(default = "default_obs_buffer_len")]
    pub obs_buffer_len: usize,

    // --- External Vision ---
    #[serde(default = "default_ev_ctrl")]
    pub ev_ctrl: u8,
    /// Minimum reported vision quality, 0..=100.
    #[serde(default)]
    pub ev_quality_min: u8,
    #[serde(default = "default_ev_max_interval_us")]
    pub ev_max_interval_us: u64,
    /// Lower bound on the vision position noise, in m.
    #[serde(default = "default_ev_pos_noise")]
    pub ev_pos_noise: f64,
    /// Lower bound on the vision velocity noise, in m/s.
    #[serde(default = "default_ev_vel_noise")]
    pub ev_vel_noise: f64,
    /// Lower bound on the vision heading noise, in rad.
    #[serde(default = "default_ev_att_noise")]
    pub ev_att_noise: f64,
    #[serde(default = "default_ev_pos_gate")]
    pub ev_pos_gate: f64,
    #[serde(default = "default_ev_vel_gate")]
    pub ev_vel_gate: f64,
    #[serde(default = "default_heading_gate")]
    pub heading_gate: f64,

    // --- GNSS ---
    #[serde(default)]
    pub height_ref: HeightRef,
    #[serde(default = "default_gnss_max_interval_us")]
    pub gnss_max_interval_us: u64,
    #[serde(default = "default_gps_pos_noise")]
    pub gps_pos_noise: f64,
    #[serde(default = "default_gps_pos_gate")]
    pub gps_pos_gate: f64,
    /// Bias process noise spectral density, in m/s/sqrt(Hz).
    #[serde(default = "default_gps_hgt_bias_nsd")]
    pub gps_hgt_bias_nsd: f64,
    /// Largest vertical accuracy accepted, in m.
    #[serde(default = "default_gps_vacc_max")]
    pub gps_vacc_max: f64,

    // --- Synthetic Sources ---
    /// Gravity vector observation noise, in m/s^2.
    #[serde(default = "default_grav_noise")]
    pub grav_noise: f64,
    #[serde(default = "default_grav_gate")]
    pub grav_gate: f64,
    /// Observation noise of the fake height used while no vertical aiding is active, in m.
    #[serde(default = "default_noaid_noise")]
    pub noaid_noise: f64,

    // --- Timeouts ---
    #[serde(default = "default_hgt_fusion_timeout_us")]
    pub hgt_fusion_timeout_us: u64,
    #[serde(default = "default_reset_timeout_us")]
    pub reset_timeout_us: u64,
    /// Dead-reckoning time after which the fake height may take over, in us.
    #[serde(default = "default_no_aid_timeout_us")]
    pub no_aid_timeout_us: u64,

    // --- At-Rest Detection ---
    #[serde(default = "default_at_rest_gyro_max")]
    pub at_rest_gyro_max: f64,
    #[serde(default = "default_at_rest_accel_dev_max")]
    pub at_rest_accel_dev_max: f64,
    #[serde(default = "default_at_rest_time_us")]
    pub at_rest_time_us: u64,

    #[serde(default)]
    pub nav_noise: NavProcessNoise,
}

fn default_fusion_delay_us() -> u64 {
    100_000
}
fn default_sample_accept_window_us() -> u64 {
    DEFAULT_ACCEPT_WINDOW_US
}
fn default_imu_buffer_len() -> usize {
    32
}
fn default_obs_buffer_len() -> usize {
    12
}
fn default_ev_ctrl() -> u8 {
    ev_ctrl::HPOS | ev_ctrl::VPOS | ev_ctrl::VEL | ev_ctrl::YAW
}
fn default_ev_max_interval_us() -> u64 {
    200_000
}
fn default_ev_pos_noise() -> f64 {
    0.1
}
fn default_ev_vel_noise() -> f64 {
    0.1
}
fn default_ev_att_noise() -> f64 {
    0.1
}
fn default_ev_pos_gate() -> f64 {
    5.0
}
fn default_ev_vel_gate() -> f64 {
    3.0
}
fn default_heading_gate() -> f64 {
    2.6
}
fn default_gnss_max_interval_us() -> u64 {
    500_000
}
fn default_gps_pos_noise() -> f64 {
    0.5
}
fn default_gps_pos_gate() -> f64 {
    5.0
}
fn default_gps_hgt_bias_nsd() -> f64 {
    0.13
}
fn default_gps_vacc_max() -> f64 {
    8.0
}
fn default_grav_noise() -> f64 {
    1.0
}
fn default_grav_gate() -> f64 {
    3.0
}
fn default_noaid_noise() -> f64 {
    10.0
}
fn default_hgt_fusion_timeout_us() -> u64 {
    5_000_000
}
fn default_reset_timeout_us() -> u64 {
    7_000_000
}
fn default_no_aid_timeout_us() -> u64 {
    1_000_000
}
fn default_at_rest_gyro_max() -> f64 {
    0.05
}
fn default_at_rest_accel_dev_max() -> f64 {
    0.3
}
fn default_at_rest_time_us() -> u64 {
    1_000_000
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            fusion_delay_us: default_fusion_delay_us(),
            sample_accept_window_us: default_sample_accept_window_us(),
            imu_buffer_len: default_imu_buffer_len(),
            obs_buffer_len: default_obs_buffer_len(),
            ev_ctrl: default_ev_ctrl(),
            ev_quality_min: 0,
            ev_max_interval_us: default_ev_max_interval_us(),
            ev_pos_noise: default_ev_pos_noise(),
            ev_vel_noise: default_ev_vel_noise(),
            ev_att_noise: default_ev_att_noise(),
            ev_pos_gate: default_ev_pos_gate(),
            ev_vel_gate: default_ev_vel_gate(),
            heading_gate: default_heading_gate(),
            height_ref: HeightRef::default(),
            gnss_max_interval_us: default_gnss_max_interval_us(),
            gps_pos_noise: default_gps_pos_noise(),
            gps_pos_gate: default_gps_pos_gate(),
            gps_hgt_bias_nsd: default_gps_hgt_bias_nsd(),
            gps_vacc_max: default_gps_vacc_max(),
            grav_noise: default_grav_noise(),
            grav_gate: default_grav_gate(),
            noaid_noise: default_noaid_noise(),
            hgt_fusion_timeout_us: default_hgt_fusion_timeout_us(),
            reset_timeout_us: default_reset_timeout_us(),
            no_aid_timeout_us: default_no_aid_timeout_us(),
            at_rest_gyro_max: default_at_rest_gyro_max(),
            at_rest_accel_dev_max: default_at_rest_accel_dev_max(),
            at_rest_time_us: default_at_rest_time_us(),
            nav_noise: NavProcessNoise::default(),
        }
    }
}

impl EstimatorParams {
    pub fn ev_ctrl_enabled(&self, bit: u8) -> bool {
        self.ev_ctrl & bit != 0
    }
}

/// Parameters of the hover-thrust module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HoverThrustParams {
    /// Prior hover thrust, normalized to [0, 1].
    #[serde(default = "default_hover_thrust")]
    pub hover_thrust: f64,
    /// Process noise of the hover thrust, in normalized thrust per second.
    #[serde(default = "default_hover_thrust_noise")]
    pub hover_thrust_noise: f64,
    /// One-sigma uncertainty of the prior.
    #[serde(default = "default_hover_thrust_err_init")]
    pub hover_thrust_err_init: f64,
    /// Allowed distance of the estimate from the prior.
    #[serde(default = "default_thrust_range")]
    pub thrust_range: f64,
    #[serde(default = "default_acc_gate")]
    pub acc_gate: f64,
    /// Horizontal speed above which the measurement noise is inflated, in m/s.
    #[serde(default = "default_vxy_thr")]
    pub vxy_thr: f64,
    /// Vertical speed above which the measurement noise is inflated, in m/s.
    #[serde(default = "default_vz_thr")]
    pub vz_thr: f64,
}

fn default_hover_thrust() -> f64 {
    0.5
}
fn default_hover_thrust_noise() -> f64 {
    0.0036
}
fn default_hover_thrust_err_init() -> f64 {
    0.1
}
fn default_thrust_range() -> f64 {
    0.2
}
fn default_acc_gate() -> f64 {
    3.0
}
fn default_vxy_thr() -> f64 {
    10.0
}
fn default_vz_thr() -> f64 {
    2.0
}

impl Default for HoverThrustParams {
    fn default() -> Self {
        Self {
            hover_thrust: default_hover_thrust(),
            hover_thrust_noise: default_hover_thrust_noise(),
            hover_thrust_err_init: default_hover_thrust_err_init(),
            thrust_range: default_thrust_range(),
            acc_gate: default_acc_gate(),
            vxy_thr: default_vxy_thr(),
            vz_thr: default_vz_thr(),
        }
    }
}

impl HoverThrustParams {
    /// Lower bound of the estimate around the prior.
    pub fn min_hover_thrust(&self) -> f64 {
        (self.hover_thrust - self.thrust_range).clamp(0.1, 0.8)
    }

    /// Upper bound of the estimate around the prior.
    pub fn max_hover_thrust(&self) -> f64 {
        (self.hover_thrust + self.thrust_range).clamp(0.2, 0.9)
    }
}
