// aerie_sim/src/cli.rs

use clap::Parser;
use std::path::PathBuf;

/// Aerie: replays simulated flights through the delayed-fusion estimator.
///
/// This struct defines the command-line arguments of the `aerie_sim` binary.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The path to the scenario TOML file to run.
    #[arg(
        short,
        long,
        default_value = "assets/scenarios/00_vision_hover.toml",
        conflicts_with = "scenario_dir"
    )]
    pub scenario: PathBuf,

    /// Run every `.toml` scenario found below this directory instead.
    #[arg(long)]
    pub scenario_dir: Option<PathBuf>,

    /// Overrides the seed of every scenario.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Only print the end-of-run summaries, not the per-transition log.
    #[arg(long, default_value_t = false)]
    pub summary_only: bool,
}

impl Cli {
    /// The log filter used when `RUST_LOG` is not set.
    pub fn default_log_filter(&self) -> &'static str {
        if self.summary_only {
            "warn"
        } else {
            "info,aerie_core=debug"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["aerie_sim"]);
        assert_eq!(
            cli.scenario,
            PathBuf::from("assets/scenarios/00_vision_hover.toml")
        );
        assert!(cli.scenario_dir.is_none());
        assert_eq!(cli.default_log_filter(), "info,aerie_core=debug");
    }

    #[test]
    fn test_batch_flags() {
        let cli = Cli::parse_from([
            "aerie_sim",
            "--scenario-dir",
            "assets/scenarios",
            "--seed",
            "3",
            "--summary-only",
        ]);
        assert_eq!(cli.scenario_dir, Some(PathBuf::from("assets/scenarios")));
        assert_eq!(cli.seed, Some(3));
        assert_eq!(cli.default_log_filter(), "warn");
    }
}
