//! Crate-wide error type.
//!
//! Only recoverable failures live here: bad configuration and unreadable
//! weight files. Caller-contract violations inside the compute path (wrong
//! buffer sizes, batch-norm backward outside training) panic instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown activation: {0}")]
    UnknownActivation(String),

    #[error("Unknown cost type: {0}")]
    UnknownCostType(String),

    #[error("Unknown weight filler: {0}")]
    UnknownFiller(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Weights file error: {0}")]
    WeightFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
