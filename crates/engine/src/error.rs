//! Engine error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The wallet has no usable trades; it is skipped, the batch continues
    #[error("No usable trades for wallet {wallet}")]
    MissingData { wallet: String },

    /// A metric is negative, NaN or infinite; the wallet's scoring aborts
    #[error("Invalid metrics for wallet {wallet}: {reason}")]
    InvalidMetrics { wallet: String, reason: String },

    /// Threshold configuration is unusable; fatal before any wallet runs
    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
