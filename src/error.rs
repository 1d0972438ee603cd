//! Error types for the optimizer pipeline.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OptimizerError {
    /// The market data provider failed or returned no usable prices.
    #[error("data acquisition failed for {symbol}: {reason}")]
    DataAcquisition { symbol: String, reason: String },

    /// Statistics or simulation received malformed or insufficient input.
    #[error("computation error: {0}")]
    Computation(String),

    /// A chart could not be written.
    #[error("failed to render {}: {reason}", path.display())]
    Render { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl OptimizerError {
    pub fn data(symbol: impl Into<String>, reason: impl ToString) -> Self {
        Self::DataAcquisition {
            symbol: symbol.into(),
            reason: reason.to_string(),
        }
    }

    pub fn render(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Render {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OptimizerError>;
