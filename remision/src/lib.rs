//! VeriFactu Remision
//!
//! Drives pending invoice records to the tax authority in batches.
//!
//! # Architecture
//!
//! 1. **Assembly**: pending records of a tenant are frozen into queued batches
//! 2. **Claim**: one worker moves a batch `queued -> processing` by CAS
//! 3. **Submission**: the gateway call is bounded by a timeout; a timeout is a
//!    transport failure, never a success
//! 4. **Write-back**: every record outcome is written once; terminal records
//!    are never overwritten
//!
//! Transport failures back off exponentially up to a retry ceiling. A circuit
//! breaker and a flow-control interval keep the scheduler from hammering an
//! unhealthy or rate-limited gateway.
//!
//! # Example
//!
//! ```no_run
//! use invoice_ledger::{AuditLog, Ledger, MemoryStore, SystemClock};
//! use remision::gateway::mock::{MockGateway, StaticConnection};
//! use remision::{Config, RemisionScheduler};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> remision::Result<()> {
//!     let ledger_config = invoice_ledger::Config::default();
//!     let store = Arc::new(MemoryStore::new());
//!     let clock = Arc::new(SystemClock);
//!     let audit = AuditLog::new(store.clone(), clock.clone(), &ledger_config.audit);
//!     let ledger = Arc::new(Ledger::new(store.clone(), audit, clock, ledger_config.ledger));
//!
//!     let scheduler = Arc::new(RemisionScheduler::new(
//!         ledger,
//!         store,
//!         Arc::new(MockGateway::new()),
//!         Arc::new(StaticConnection::default()),
//!         Config::default(),
//!     )?);
//!
//!     let summary = scheduler.run_once().await?;
//!     println!("{} batches created", summary.batches_created);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod breaker;
pub mod config;
pub mod error;
pub mod gateway;
pub mod retry;
pub mod scheduler;
pub mod types;

// Re-exports
pub use breaker::{CircuitBreaker, FlowControl};
pub use config::Config;
pub use error::{Error, Result, TransportError};
pub use gateway::{
    ConnectionProvider, GatewayAdapter, GatewayResponse, RecordOutcome, SubmissionRequest, Verdict,
};
pub use retry::RetryPolicy;
pub use scheduler::RemisionScheduler;
pub use types::{BatchDetail, DeferReason, DriveOutcome, QueueStatus, SweepSummary};
