//! Error types for the ledger

use crate::types::{BatchStatus, SeriesId, SubmissionStatus};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input fields; rejected before any hash is computed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Series tip changed between read and write
    #[error("Concurrency conflict on {series}: expected tip {expected_tip:?}, found {actual_tip:?}")]
    ConcurrencyConflict {
        /// Series being appended to
        series: SeriesId,
        /// Tip ID read before hashing
        expected_tip: Option<u64>,
        /// Tip ID found at write time
        actual_tip: Option<u64>,
    },

    /// Verified break in an existing chain; the series refuses writes
    #[error("Chain integrity error on {series}: {reason}")]
    ChainIntegrity {
        /// Broken series
        series: SeriesId,
        /// Block reason
        reason: String,
    },

    /// Record not found
    #[error("Record not found: {0}")]
    RecordNotFound(u64),

    /// Batch not found
    #[error("Batch not found: {0}")]
    BatchNotFound(u64),

    /// Illegal submission status change
    #[error("Invalid submission transition for record {record_id}: {from} -> {to}")]
    InvalidSubmissionTransition {
        /// Record
        record_id: u64,
        /// Current status
        from: SubmissionStatus,
        /// Requested status
        to: SubmissionStatus,
    },

    /// Illegal batch status change
    #[error("Invalid batch transition for batch {batch_id}: {from} -> {to}")]
    InvalidBatchTransition {
        /// Batch
        batch_id: u64,
        /// Current status
        from: BatchStatus,
        /// Requested status
        to: BatchStatus,
    },

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON serialization error (audit payloads)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the caller may retry with a fresh tip read
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::ConcurrencyConflict { .. })
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
