// aerie_sim/src/simulation/config/structs.rs

use aerie_core::params::{EstimatorParams, HoverThrustParams};
use serde::Deserialize;

// =========================================================================
// == Top-Level Configuration ==
// =========================================================================

/// # ScenarioConfig
/// The root of the data parsed from a `scenario.toml` file.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)] // Fail if the TOML has fields not in our struct
pub struct ScenarioConfig {
    #[serde(default)] // Use default if the [simulation] section is missing
    pub simulation: Simulation,

    #[serde(default)]
    pub estimator: EstimatorParams,

    #[serde(default)]
    pub hover_thrust: HoverThrustParams,

    // The TOML has `[[sensors]]`, which becomes a Vec of SensorConfig.
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,

    #[serde(default)]
    pub flight: Flight,

    #[serde(default)]
    pub faults: Vec<FaultConfig>,
}

// =========================================================================
// == Configuration Sub-Structs ==
// =========================================================================

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Simulation {
    /// Optional seed for the pseudo-random number generator for determinism.
    pub seed: Option<u64>,
    /// Duration of the run in seconds.
    pub duration_seconds: f64,
    #[serde(default = "default_imu_rate")]
    pub imu_rate: f64,
    /// Accelerometer white noise, in m/s^2.
    #[serde(default)]
    pub accel_noise_stddev: f64,
    /// Gyro white noise, in rad/s.
    #[serde(default)]
    pub gyro_noise_stddev: f64,
}

fn default_imu_rate() -> f64 {
    250.0
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            seed: None,
            duration_seconds: 30.0,
            imu_rate: default_imu_rate(),
            accel_noise_stddev: 0.0,
            gyro_noise_stddev: 0.0,
        }
    }
}

/// The vehicle's true motion: on the ground until `takeoff_seconds`, then
/// hovering with a vertical oscillation.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Flight {
    /// The thrust that actually holds the vehicle in hover.
    pub hover_thrust: f64,
    pub takeoff_seconds: f64,
    /// Peak-to-peak is twice this, in m.
    #[serde(default)]
    pub oscillation_amplitude: f64,
    #[serde(default = "default_oscillation_period")]
    pub oscillation_period: f64,
    /// True heading, in degrees.
    #[serde(default)]
    pub yaw_deg: f64,
}

fn default_oscillation_period() -> f64 {
    4.0
}

impl Default for Flight {
    fn default() -> Self {
        Self {
            hover_thrust: 0.5,
            takeoff_seconds: 2.0,
            oscillation_amplitude: 0.0,
            oscillation_period: default_oscillation_period(),
            yaw_deg: 0.0,
        }
    }
}

// =========================================================================
// == Sensors ==
// =========================================================================

// The `tag = "kind"` tells Serde to look for a `kind = "..."` field in the TOML
// to decide which variant to parse.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
#[serde(rename_all = "PascalCase")] // "Vision" in TOML maps to Vision variant
pub enum SensorConfig {
    Vision(VisionConfig),
    Gnss(GnssConfig),
}

impl SensorConfig {
    pub fn get_kind_str(&self) -> &str {
        match self {
            SensorConfig::Vision(_) => "Vision",
            SensorConfig::Gnss(_) => "Gnss",
        }
    }
}

/// Configuration parameters for a simulated external vision system.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VisionConfig {
    /// The rate at which odometry is produced, in Hz.
    pub rate: f64,
    /// Delay between the time of validity and delivery, in ms.
    #[serde(default)]
    pub latency_ms: f64,
    #[serde(default)]
    pub position_noise_stddev: f64,
    #[serde(default)]
    pub velocity_noise_stddev: f64,
    #[serde(default)]
    pub yaw_noise_stddev: f64,
    #[serde(default = "default_vision_quality")]
    pub quality: u8,
}

fn default_vision_quality() -> u8 {
    100
}

/// Configuration parameters for a simulated GNSS receiver.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GnssConfig {
    pub rate: f64,
    #[serde(default)]
    pub latency_ms: f64,
    /// Altitude noise, also reported as the vertical accuracy, in m.
    #[serde(default = "default_gnss_height_noise")]
    pub height_noise_stddev: f64,
    /// Altitude of the takeoff point above mean sea level, in m.
    #[serde(default)]
    pub origin_altitude: f64,
    #[serde(default = "default_fix_type")]
    pub fix_type: u8,
}

fn default_gnss_height_noise() -> f64 {
    0.5
}

fn default_fix_type() -> u8 {
    3
}

// =========================================================================
// == Faults ==
// =========================================================================

/// Injected sensor faults, each active over a time window.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind")]
#[serde(rename_all = "PascalCase")]
pub enum FaultConfig {
    /// No vision samples in `[start_seconds, end_seconds)`.
    VisionDropout { start_seconds: f64, end_seconds: f64 },
    /// Vision keeps publishing but reports `quality`.
    VisionLowQuality {
        start_seconds: f64,
        end_seconds: f64,
        quality: u8,
    },
    /// A constant offset added to every GNSS altitude from `start_seconds` on.
    GnssHeightStep { start_seconds: f64, offset: f64 },
}

impl FaultConfig {
    pub fn is_active(&self, time_seconds: f64) -> bool {
        match self {
            FaultConfig::VisionDropout {
                start_seconds,
                end_seconds,
            }
            | FaultConfig::VisionLowQuality {
                start_seconds,
                end_seconds,
                ..
            } => (*start_seconds..*end_seconds).contains(&time_seconds),
            FaultConfig::GnssHeightStep { start_seconds, .. } => time_seconds >= *start_seconds,
        }
    }
}
