use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] molprop_core::Error),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error("Unknown aggregation mode '{0}', expected one of: sum, avg, max")]
    InvalidAggMode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Molecule {index} in the batch has no valid atoms")]
    EmptyMolecule { index: usize },

    #[error("Loss became non-finite ({value}) at {partition} iteration {iteration}")]
    NonFiniteLoss {
        value: f32,
        partition: String,
        iteration: usize,
    },

    #[error("Tensor '{key}' not found in '{path}'", path = path.display())]
    MissingTensor { key: String, path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
