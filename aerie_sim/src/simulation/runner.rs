// aerie_sim/src/simulation/runner.rs

//! Steps the truth model, the sensors and both estimators through one scenario.

use std::fmt;

use aerie_core::aid::flags::ControlStatusFlags;
use aerie_core::estimator::{AidingEstimator, SourceSummary};
use aerie_core::hover_thrust::{
    HoverThrustEstimator, HoverThrustStatus, LocalPositionSample, VehicleLandState,
};
use aerie_core::nav::NavState;
use aerie_core::types::{Sample, TimeUs, ONE_G};
use nalgebra::Vector3;
use serde::Serialize;
use tracing::{debug, info};

use crate::simulation::config::{ScenarioConfig, SensorConfig};
use crate::simulation::core::prng::SimulationRng;
use crate::simulation::core::truth::{TruthModel, TruthState};
use crate::simulation::error::SimError;
use crate::simulation::sensors::{period_us, GnssSensor, ImuSensor, VisionSensor};

/// Outcome of one scenario run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub name: String,
    pub seed: Option<u64>,
    pub duration_seconds: f64,
    /// IMU samples fed to the estimator.
    pub cycles: u64,
    /// Cycles in which the fusion horizon advanced.
    pub fusion_cycles: u64,
    pub flags: ControlStatusFlags,
    pub sources: Vec<SourceSummary>,
    pub nav: NavState,
    pub true_position: Vector3<f64>,
    pub hover_thrust: HoverThrustStatus,
    pub true_hover_thrust: f64,
}

impl RunReport {
    pub fn position_error(&self) -> Vector3<f64> {
        self.nav.position - self.true_position
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "== {} ({:.1} s, seed {:?}, {} cycles, {} fused) ==",
            self.name, self.duration_seconds, self.seed, self.cycles, self.fusion_cycles
        )?;
        writeln!(
            f,
            "{:<16} {:>6} {:>7} {:>6} {:>7} {:>8} {:>10}",
            "source", "active", "starts", "stops", "resets", "fused", "test ratio"
        )?;
        for s in &self.sources {
            writeln!(
                f,
                "{:<16} {:>6} {:>7} {:>6} {:>7} {:>8} {:>10.3}",
                s.name,
                s.active,
                s.counters.starts,
                s.counters.stops,
                s.counters.resets,
                s.counters.fused_cycles,
                s.test_ratio
            )?;
        }
        let err = self.position_error();
        writeln!(
            f,
            "position error [m]: n {:+.3}  e {:+.3}  d {:+.3}",
            err.x, err.y, err.z
        )?;
        write!(
            f,
            "hover thrust: {:.4} (true {:.4}, std {:.4}, valid {})",
            self.hover_thrust.hover_thrust,
            self.true_hover_thrust,
            self.hover_thrust.hover_thrust_var.sqrt(),
            self.hover_thrust.valid
        )
    }
}

/// Everything that lives for the duration of one run.
pub struct Simulation {
    config: ScenarioConfig,
    seed: Option<u64>,
    rng: SimulationRng,
    truth: TruthModel,
    imu: ImuSensor,
    vision: Vec<VisionSensor>,
    gnss: Vec<GnssSensor>,
    estimator: AidingEstimator,
    hover_thrust: HoverThrustEstimator,
    cycles: u64,
    fusion_cycles: u64,
}

impl Simulation {
    /// Builds a run; `seed_override` takes precedence over the scenario's seed.
    pub fn new(config: ScenarioConfig, seed_override: Option<u64>) -> Result<Self, SimError> {
        let seed = seed_override.or(config.simulation.seed);

        let mut vision = Vec::new();
        let mut gnss = Vec::new();
        for sensor in &config.sensors {
            debug!("adding {} sensor", sensor.get_kind_str());
            match sensor {
                SensorConfig::Vision(v) => vision.push(VisionSensor::new(v)?),
                SensorConfig::Gnss(g) => gnss.push(GnssSensor::new(g)?),
            }
        }

        Ok(Self {
            rng: SimulationRng::from_seed_or_entropy(seed),
            truth: TruthModel::new(config.flight.clone()),
            imu: ImuSensor::new(&config.simulation)?,
            estimator: AidingEstimator::new(config.estimator.clone())?,
            hover_thrust: HoverThrustEstimator::new(config.hover_thrust.clone()),
            vision,
            gnss,
            seed,
            config,
            cycles: 0,
            fusion_cycles: 0,
        })
    }

    pub fn estimator(&self) -> &AidingEstimator {
        &self.estimator
    }

    pub fn hover_thrust(&self) -> &HoverThrustEstimator {
        &self.hover_thrust
    }

    /// Runs the whole scenario and summarizes it under `name`.
    pub fn run(mut self, name: &str) -> Result<RunReport, SimError> {
        let dt_us = period_us(self.config.simulation.imu_rate);
        let end_us = (self.config.simulation.duration_seconds * 1e6) as TimeUs;
        info!(scenario = name, seed = ?self.seed, "starting run");

        let mut now_us = 0;
        let mut truth = self.truth.state_at(0.0);
        while now_us <= end_us {
            truth = self.truth.state_at(now_us as f64 * 1e-6);
            self.step(now_us, &truth)?;
            now_us += dt_us;
        }

        info!(scenario = name, cycles = self.cycles, "run complete");
        Ok(RunReport {
            name: name.to_string(),
            seed: self.seed,
            duration_seconds: self.config.simulation.duration_seconds,
            cycles: self.cycles,
            fusion_cycles: self.fusion_cycles,
            flags: *self.estimator.flags(),
            sources: self.estimator.source_summaries(),
            nav: self.estimator.nav_state(),
            true_position: truth.position,
            hover_thrust: *self.hover_thrust.status(),
            true_hover_thrust: self.config.flight.hover_thrust,
        })
    }

    /// One IMU period: deliver sensor data, run the aiding estimator, then the
    /// hover-thrust estimator.
    pub fn step(&mut self, now_us: TimeUs, truth: &TruthState) -> Result<(), SimError> {
        let faults = &self.config.faults;
        for sensor in &mut self.vision {
            for sample in sensor.step(now_us, truth, faults, &mut self.rng) {
                self.estimator.push_vision(sample)?;
            }
        }
        for sensor in &mut self.gnss {
            for sample in sensor.step(now_us, truth, faults, &mut self.rng) {
                self.estimator.push_gnss(sample)?;
            }
        }

        self.estimator.set_in_air(truth.in_air);
        let imu = self.imu.measure(truth, &mut self.rng);
        if self.estimator.update(Sample::new(now_us, imu))? {
            self.fusion_cycles += 1;
        }
        self.cycles += 1;

        let nav = self.estimator.nav_state();
        let local_pos = LocalPositionSample {
            time_us: now_us,
            // level flight: body down is NED down
            accel_d: imu.accel.z + ONE_G,
            velocity: nav.velocity,
            v_xy_valid: self.estimator.flags().is_horizontal_aiding_active(),
            v_z_valid: self.estimator.flags().is_vertical_aiding_active(),
        };
        let land_state = VehicleLandState {
            armed: true,
            landed: !truth.in_air,
        };
        let thrust = truth.thrust(self.config.flight.hover_thrust);
        self.hover_thrust
            .update(now_us, &local_pos, -thrust, land_state)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::config::parse_scenario;
    use approx::assert_abs_diff_eq;

    const VISION_FLIGHT: &str = r#"
        [simulation]
        seed = 11
        duration_seconds = 12.0
        accel_noise_stddev = 0.05
        gyro_noise_stddev = 0.001

        [[sensors]]
        kind = "Vision"
        rate = 30.0
        latency_ms = 40.0
        position_noise_stddev = 0.02
        velocity_noise_stddev = 0.02
        yaw_noise_stddev = 0.01

        [flight]
        hover_thrust = 0.42
        takeoff_seconds = 1.0
        oscillation_amplitude = 0.5
        oscillation_period = 4.0
    "#;

    fn summary<'a>(report: &'a RunReport, name: &str) -> &'a SourceSummary {
        report
            .sources
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("no source named {name}"))
    }

    #[test]
    fn test_same_seed_same_report() {
        let config = parse_scenario(VISION_FLIGHT).unwrap();
        let a = Simulation::new(config.clone(), None).unwrap().run("a").unwrap();
        let b = Simulation::new(config, None).unwrap().run("a").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_seed_override_changes_noise() {
        let config = parse_scenario(VISION_FLIGHT).unwrap();
        let a = Simulation::new(config.clone(), None).unwrap().run("a").unwrap();
        let b = Simulation::new(config, Some(12)).unwrap().run("a").unwrap();
        assert_eq!(b.seed, Some(12));
        assert_ne!(a.nav, b.nav);
    }

    #[test]
    fn test_vision_flight_tracks_and_learns_hover_thrust() {
        let config = parse_scenario(VISION_FLIGHT).unwrap();
        let report = Simulation::new(config, None).unwrap().run("vision").unwrap();

        assert!(report.flags.ev_pos && report.flags.ev_vel && report.flags.ev_hgt);
        assert!(report.flags.in_air);
        assert!(summary(&report, "gravity vector").counters.starts >= 1);
        assert!(report.position_error().norm() < 0.5);

        assert_abs_diff_eq!(report.hover_thrust.hover_thrust, 0.42, epsilon = 0.03);
        assert!(report.cycles > report.fusion_cycles);
    }

    #[test]
    fn test_vision_dropout_stops_and_restarts() {
        let toml = format!(
            "{VISION_FLIGHT}\n[[faults]]\nkind = \"VisionDropout\"\nstart_seconds = 5.0\nend_seconds = 7.0\n"
        );
        let config = parse_scenario(&toml).unwrap();
        let report = Simulation::new(config, None).unwrap().run("dropout").unwrap();

        let ev_pos = summary(&report, "EV position");
        assert!(ev_pos.counters.stops >= 1);
        assert!(ev_pos.counters.starts >= 2);
        assert!(report.flags.ev_pos);
    }
}
