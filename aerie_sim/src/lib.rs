// aerie_sim/src/lib.rs

//! A headless harness that replays simulated sensor data through the
//! `aerie_core` estimators, one scenario file at a time.

// This prelude is for convenience for other files WITHIN the aerie_sim crate.
pub mod prelude;

pub mod cli;
pub mod simulation;

use std::path::Path;

use crate::simulation::config::load_scenario;
use crate::simulation::error::SimError;
use crate::simulation::runner::{RunReport, Simulation};

/// Loads and runs one scenario file; the report is named after the file stem.
pub fn run_scenario_file(path: &Path, seed_override: Option<u64>) -> Result<RunReport, SimError> {
    let config = load_scenario(path)?;
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Simulation::new(config, seed_override)?.run(&name)
}
