//! Persistence interfaces
//!
//! Three tables back the core: `invoice_record`, `remision_batch` and
//! `audit_event`. Business and hash logic lives outside the stores; a store
//! only enforces the write-time invariants it alone can check atomically:
//!
//! - `append_record` is a compare-and-swap on the series tip
//! - `update_submission` only moves a record forward through its lifecycle
//! - `create_batch` assigns each pending record to at most one batch
//! - `compare_and_swap_batch` is the single-claimant status transition
//! - audit events can be appended and read, never changed

mod memory;
mod rocks;

pub use memory::MemoryStore;
pub use rocks::RocksStore;

use crate::types::{
    AuditCursor, AuditEvent, AuditFilter, BatchStatus, InvoiceRecord, NewAuditEvent, NewBatch,
    RecordDraft, RemisionBatch, SeriesBlock, SeriesId, SubmissionUpdate, TenantId,
    VerificationSummary,
};
use crate::Result;
use chrono::{DateTime, Utc};

/// Invoice record persistence
pub trait RecordStore: Send + Sync {
    /// Persist a new record if the series tip is still `expected_tip`.
    ///
    /// Assigns the next ID. Fails with `Error::ConcurrencyConflict` when the
    /// tip moved since it was read.
    fn append_record(&self, draft: RecordDraft, expected_tip: Option<u64>) -> Result<InvoiceRecord>;

    /// Record by ID
    fn get_record(&self, id: u64) -> Result<Option<InvoiceRecord>>;

    /// Highest-ID record of a series
    fn tip(&self, series: &SeriesId) -> Result<Option<InvoiceRecord>>;

    /// Records of a series with `after_id < id <= upto_id`, ascending, at most `limit`
    fn scan_series(
        &self,
        series: &SeriesId,
        after_id: Option<u64>,
        upto_id: u64,
        limit: usize,
    ) -> Result<Vec<InvoiceRecord>>;

    /// Number of records in a series
    fn series_len(&self, series: &SeriesId) -> Result<u64>;

    /// Move a record's transmission status forward
    fn update_submission(&self, id: u64, update: SubmissionUpdate) -> Result<InvoiceRecord>;

    /// Pending records of a tenant not yet assigned to a batch, ascending by ID
    fn unbatched_pending(&self, tenant: &TenantId, limit: usize) -> Result<Vec<InvoiceRecord>>;

    /// Tenants that have pending records not yet assigned to a batch
    fn tenants_with_unbatched(&self) -> Result<Vec<TenantId>>;

    /// Pending records of a tenant, batched or not
    fn pending_count(&self, tenant: &TenantId) -> Result<u64>;

    /// Active write block of a series
    fn series_block(&self, series: &SeriesId) -> Result<Option<SeriesBlock>>;

    /// Place or clear a write block
    fn set_series_block(&self, series: &SeriesId, block: Option<SeriesBlock>) -> Result<()>;

    /// Store the outcome of the latest verification
    fn record_verification(&self, series: &SeriesId, summary: VerificationSummary) -> Result<()>;

    /// Outcome of the latest verification
    fn last_verification(&self, series: &SeriesId) -> Result<Option<VerificationSummary>>;
}

/// Remision batch persistence
pub trait BatchStore: Send + Sync {
    /// Create a queued batch and assign its members.
    ///
    /// Every member must exist, belong to the batch tenant, be pending and be
    /// unassigned; otherwise nothing is written.
    fn create_batch(&self, new: NewBatch) -> Result<RemisionBatch>;

    /// Batch by ID
    fn get_batch(&self, id: u64) -> Result<Option<RemisionBatch>>;

    /// Replace a batch if its stored status is still `expected`.
    ///
    /// Returns `Ok(false)` when another writer got there first.
    fn compare_and_swap_batch(&self, expected: BatchStatus, next: &RemisionBatch) -> Result<bool>;

    /// Batches, optionally filtered by tenant and status, ascending by ID
    fn list_batches(
        &self,
        tenant: Option<&TenantId>,
        status: Option<BatchStatus>,
    ) -> Result<Vec<RemisionBatch>>;

    /// Unassign the still-pending members of a batch; returns how many
    fn release_records(&self, batch_id: u64) -> Result<u32>;
}

/// Append-only audit event persistence. There is no update or delete.
pub trait AuditStore: Send + Sync {
    /// Append an event
    fn append_event(&self, event: NewAuditEvent, created_at: DateTime<Utc>) -> Result<AuditEvent>;

    /// Events of a tenant after `after`, ordered by `(created_at, id)`
    fn page_events(
        &self,
        tenant: &TenantId,
        filter: &AuditFilter,
        after: Option<AuditCursor>,
        limit: usize,
    ) -> Result<Vec<AuditEvent>>;
}

/// Shared CAS guard for batch replacement
pub(crate) fn check_batch_swap(
    current: &RemisionBatch,
    expected: BatchStatus,
    next: &RemisionBatch,
) -> Result<bool> {
    if current.status != expected {
        return Ok(false);
    }
    if expected != next.status && !expected.can_transition_to(next.status) {
        return Err(crate::Error::InvalidBatchTransition {
            batch_id: current.id,
            from: expected,
            to: next.status,
        });
    }
    if current.record_ids != next.record_ids || current.tenant_id != next.tenant_id {
        return Err(crate::Error::Validation(format!(
            "Batch {} membership is frozen",
            current.id
        )));
    }
    Ok(true)
}

/// Shared transition guard for submission updates
pub(crate) fn apply_submission(record: &mut InvoiceRecord, update: SubmissionUpdate) -> Result<()> {
    if !record.submission_status.can_transition_to(update.status) {
        return Err(crate::Error::InvalidSubmissionTransition {
            record_id: record.id,
            from: record.submission_status,
            to: update.status,
        });
    }
    record.submission_status = update.status;
    if update.reason.is_some() {
        record.rejection_reason = update.reason;
    }
    if update.response_code.is_some() {
        record.response_code = update.response_code;
    }
    Ok(())
}

/// Shared membership guard for batch creation
pub(crate) fn check_batch_member(
    record: Option<&InvoiceRecord>,
    id: u64,
    tenant: &TenantId,
) -> Result<()> {
    let record = record.ok_or(crate::Error::RecordNotFound(id))?;
    if &record.tenant_id != tenant {
        return Err(crate::Error::Validation(format!(
            "Record {} belongs to tenant {}, not {}",
            id, record.tenant_id, tenant
        )));
    }
    if record.submission_status != crate::types::SubmissionStatus::Pending {
        return Err(crate::Error::Validation(format!(
            "Record {} is {}, only pending records can be batched",
            id, record.submission_status
        )));
    }
    if let Some(batch_id) = record.remision_batch_id {
        return Err(crate::Error::Validation(format!(
            "Record {} already belongs to batch {}",
            id, batch_id
        )));
    }
    Ok(())
}
