//! VeriFactu Invoice Ledger
//!
//! Tamper-evident, append-only chain of fiscal invoice records, partitioned
//! per `(tenant, series)`.
//!
//! # Architecture
//!
//! - **Hash chain**: every record stores the hash of its predecessor
//! - **Serialized appends**: per-series lock plus a tip compare-and-swap
//! - **Lock-free verification**: bounded snapshot scans never block writers
//! - **Audit log**: append-only record of everything the core does
//!
//! # Invariants
//!
//! - Exactly one genesis record per series
//! - `record[i].hash_previous == record[i-1].hash_self`, ordered by ID
//! - Business and hash fields never change after append
//! - Submission status only moves forward and never leaves a terminal state

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod audit;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod storage;
pub mod types;
pub mod verifier;

// Re-exports
pub use audit::{AuditLog, AuditQuery};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::{ChainScan, Ledger};
pub use metrics::Metrics;
pub use storage::{AuditStore, BatchStore, MemoryStore, RecordStore, RocksStore};
pub use types::{
    AuditEvent, AuditEventType, AuditFilter, AuditSeverity, BatchStatus, ChainStatus,
    Environment, InvoiceFields, InvoiceKind, InvoiceRecord, NewAuditEvent, RecordType,
    RemisionBatch, SeriesId, SeriesKey, SubmissionStatus, TenantId,
};
pub use verifier::{BreakKind, ChainBreak, ChainVerifier, IntegrityReport};
