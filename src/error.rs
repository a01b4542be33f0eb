//! Error types for the Trestle relayer

use thiserror::Error;

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("RPC error on chain {chain}: {message}")]
    Rpc { chain: String, message: String },

    #[error("Rate limited on chain {chain}")]
    RateLimited { chain: String },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Event parsing error: {0}")]
    EventParsing(String),

    #[error("State file error: {0}")]
    State(#[from] std::io::Error),

    #[error("State encoding error: {0}")]
    StateEncoding(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Transient infrastructure errors: the watcher retries the same block
    /// range instead of surfacing these as event-level failures.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayerError::Rpc { .. }
                | RelayerError::RateLimited { .. }
                | RelayerError::Timeout { .. }
        )
    }

    /// Errors that warrant a long pause before retrying the same range.
    pub fn is_throttle(&self) -> bool {
        matches!(
            self,
            RelayerError::RateLimited { .. } | RelayerError::Timeout { .. }
        )
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;
