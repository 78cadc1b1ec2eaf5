// aerie_sim/src/main.rs

//! Runs one scenario, or a directory of them, and prints a summary per run.
//!
//! `cargo run -p aerie_sim -- --scenario-dir assets/scenarios --summary-only`

use std::process::ExitCode;

use aerie_sim::cli::Cli;
use aerie_sim::run_scenario_file;
use aerie_sim::simulation::config::discover_scenarios;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over the built-in filter.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.default_log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let scenarios = match &cli.scenario_dir {
        Some(dir) => match discover_scenarios(dir) {
            Ok(paths) => paths,
            Err(e) => {
                error!("{e}");
                return ExitCode::FAILURE;
            }
        },
        None => vec![cli.scenario.clone()],
    };

    let mut failed = 0;
    for path in &scenarios {
        match run_scenario_file(path, cli.seed) {
            Ok(report) => println!("{report}\n"),
            Err(e) => {
                error!("scenario {:?} failed: {e}", path);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        error!("{failed} of {} scenarios failed", scenarios.len());
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
