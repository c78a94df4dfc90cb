use thiserror::Error;

use crate::TradeSide;

#[derive(Debug, Error)]
pub enum Error {
    /// Fewer candles than a computation needs. Live callers hold and retry.
    #[error("Insufficient data: have {have} candles, need {need}")]
    InsufficientData { have: usize, need: usize },

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    /// Every slippage rung failed; `source` is the last venue error.
    #[error("{side} execution failed after {attempts} attempts: {source}")]
    ExecutionFailed {
        side: TradeSide,
        attempts: usize,
        #[source]
        source: Box<Error>,
    },

    /// A caller broke the position lifecycle (open while open, close while closed).
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Venue error: {0}")]
    Venue(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors that abort one decision but leave the live loop running.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::InvariantViolation(_) | Error::Config(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
