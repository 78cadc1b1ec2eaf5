// aerie_sim/src/prelude.rs

pub use crate::cli::Cli;
pub use crate::simulation::config::{
    FaultConfig, Flight, GnssConfig, ScenarioConfig, SensorConfig, VisionConfig,
};
pub use crate::simulation::core::prng::SimulationRng;
pub use crate::simulation::core::truth::{TruthModel, TruthState};
pub use crate::simulation::error::SimError;
pub use crate::simulation::runner::{RunReport, Simulation};
