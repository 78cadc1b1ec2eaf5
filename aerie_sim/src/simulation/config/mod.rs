// aerie_sim/src/simulation/config/mod.rs

//! Loading and validating scenario files from disk.

pub mod structs;

use std::path::{Path, PathBuf};

use figment::{
    providers::{Format, Toml},
    Figment,
};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::simulation::error::SimError;
pub use structs::{FaultConfig, Flight, GnssConfig, ScenarioConfig, SensorConfig, VisionConfig};

/// Parses a scenario file and checks the values serde cannot.
pub fn load_scenario(path: &Path) -> Result<ScenarioConfig, SimError> {
    // figment treats a missing file as an empty document
    if !path.is_file() {
        return Err(SimError::NotFound(path.to_path_buf()));
    }
    info!("Loading scenario from: {:?}", path);
    let config: ScenarioConfig = Figment::new()
        .merge(Toml::file(path))
        .extract()
        .map_err(|e| SimError::Config {
            path: path.to_path_buf(),
            source: Box::new(e),
        })?;
    validate(&config)?;
    Ok(config)
}

/// Same as [`load_scenario`], from an in-memory TOML document.
pub fn parse_scenario(toml: &str) -> Result<ScenarioConfig, SimError> {
    let config: ScenarioConfig = Figment::new()
        .merge(Toml::string(toml))
        .extract()
        .map_err(|e| SimError::Config {
            path: PathBuf::from("<string>"),
            source: Box::new(e),
        })?;
    validate(&config)?;
    Ok(config)
}

/// Every `.toml` file below `dir`, in a stable order.
pub fn discover_scenarios(dir: &Path) -> Result<Vec<PathBuf>, SimError> {
    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| {
            !e.file_type().is_dir() && e.path().extension().map_or(false, |ext| ext == "toml")
        })
        .map(|e| e.into_path())
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(SimError::NoScenarios(dir.to_path_buf()));
    }
    debug!(count = paths.len(), "found scenarios in {:?}", dir);
    Ok(paths)
}

fn validate(config: &ScenarioConfig) -> Result<(), SimError> {
    let sim = &config.simulation;
    if !(sim.duration_seconds > 0.0) {
        return Err(SimError::InvalidScenario(format!(
            "duration_seconds must be positive, got {}",
            sim.duration_seconds
        )));
    }
    if !(sim.imu_rate > 0.0) {
        return Err(SimError::InvalidScenario(format!(
            "imu_rate must be positive, got {}",
            sim.imu_rate
        )));
    }
    if sim.accel_noise_stddev < 0.0 || sim.gyro_noise_stddev < 0.0 {
        return Err(SimError::InvalidScenario(
            "IMU noise must not be negative".to_string(),
        ));
    }
    if !(config.flight.hover_thrust > 0.0 && config.flight.hover_thrust < 1.0) {
        return Err(SimError::InvalidScenario(format!(
            "flight.hover_thrust must be in (0, 1), got {}",
            config.flight.hover_thrust
        )));
    }

    for sensor in &config.sensors {
        let (rate, noise) = match sensor {
            SensorConfig::Vision(v) => (
                v.rate,
                [
                    v.position_noise_stddev,
                    v.velocity_noise_stddev,
                    v.yaw_noise_stddev,
                ]
                .into_iter()
                .fold(0.0_f64, f64::min),
            ),
            SensorConfig::Gnss(g) => (g.rate, g.height_noise_stddev),
        };
        if !(rate > 0.0) || noise < 0.0 {
            return Err(SimError::InvalidScenario(format!(
                "{} sensor needs a positive rate and non-negative noise",
                sensor.get_kind_str()
            )));
        }
    }
    Ok(())
}
