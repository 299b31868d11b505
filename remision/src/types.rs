//! Core types for the remision scheduler

use chrono::{DateTime, Utc};
use invoice_ledger::{BatchStatus, InvoiceRecord, RemisionBatch, TenantId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Why a queued batch was left for a later sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DeferReason {
    /// Minimum interval since the last submission not reached
    FlowControl {
        /// Earliest allowed submission
        next_allowed: DateTime<Utc>,
    },
    /// Too many consecutive transport failures
    CircuitOpen {
        /// End of the pause
        until: DateTime<Utc>,
    },
    /// Connection provider reports no usable connection
    ConnectionUnusable,
}

/// Result of driving one batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DriveOutcome {
    /// Batch reached a terminal state
    Completed {
        /// Final status
        status: BatchStatus,
        /// Members accepted by the authority
        accepted: u32,
        /// Members rejected or left without an outcome
        rejected: u32,
    },
    /// Transport failed, another attempt is scheduled
    RetryScheduled {
        /// Transport attempts so far
        attempts: u32,
        /// Earliest re-queue time
        next_attempt_at: DateTime<Utc>,
    },
    /// Batch stays queued
    Deferred(DeferReason),
    /// Batch was not queued or another worker claimed it
    NotClaimed,
}

/// What one sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    /// Failed batches moved back to queued
    pub requeued: usize,
    /// New batches assembled from pending records
    pub batches_created: usize,
    /// Batches that reached a terminal state
    pub completed: usize,
    /// Batches that failed transport and will retry
    pub retry_scheduled: usize,
    /// Batches left queued by a gate
    pub deferred: usize,
    /// Batches whose drive returned an error
    pub errors: usize,
}

impl SweepSummary {
    pub(crate) fn count(&mut self, outcome: &DriveOutcome) {
        match outcome {
            DriveOutcome::Completed { .. } => self.completed += 1,
            DriveOutcome::RetryScheduled { .. } => self.retry_scheduled += 1,
            DriveOutcome::Deferred(_) => self.deferred += 1,
            DriveOutcome::NotClaimed => {}
        }
    }
}

/// Queue status exposed to API layers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Tenant
    pub tenant_id: TenantId,
    /// Records still pending transmission
    pub pending_records: u64,
    /// Batch count per status; statuses without batches are absent
    pub batches: HashMap<BatchStatus, usize>,
}

impl QueueStatus {
    /// Batches in one status
    pub fn count(&self, status: BatchStatus) -> usize {
        self.batches.get(&status).copied().unwrap_or(0)
    }
}

/// Batch with its member records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDetail {
    /// The batch
    pub batch: RemisionBatch,
    /// Members, in batch order
    pub records: Vec<InvoiceRecord>,
}
