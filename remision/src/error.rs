//! Error types for the remision scheduler

use invoice_ledger::BatchStatus;
use std::time::Duration;
use thiserror::Error;

/// Result type for remision operations
pub type Result<T> = std::result::Result<T, Error>;

/// Remision errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] invoice_ledger::Error),

    /// Another worker claimed the batch first
    #[error("Batch {0} was claimed by another worker")]
    ClaimLost(u64),

    /// Operation not allowed in the current batch status
    #[error("Cannot {operation} batch {batch_id} while it is {status}")]
    InvalidState {
        /// Batch
        batch_id: u64,
        /// Current status
        status: BatchStatus,
        /// Refused operation
        operation: &'static str,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Worker pool failure (closed semaphore or panicked task)
    #[error("Worker error: {0}")]
    Worker(String),

    /// IO error while reading configuration
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport-level gateway failure. Always retriable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No answer within the configured timeout
    #[error("gateway timed out after {0:?}")]
    Timeout(Duration),

    /// Network error before a response was received
    #[error("gateway unreachable: {0}")]
    Unreachable(String),

    /// Gateway answered with a server-side failure
    #[error("gateway server error: {0}")]
    ServerError(String),
}
