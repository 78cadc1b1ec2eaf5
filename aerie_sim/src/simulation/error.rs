// aerie_sim/src/simulation/error.rs

use std::path::PathBuf;

use aerie_core::error::{BufferError, EstimatorError, FusionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("failed to load scenario {path:?}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: Box<figment::Error>,
    },

    #[error("scenario file {0:?} not found")]
    NotFound(PathBuf),

    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("scenario directory {0:?} contains no .toml files")]
    NoScenarios(PathBuf),

    #[error(transparent)]
    Estimator(#[from] EstimatorError),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Fusion(#[from] FusionError),
}
