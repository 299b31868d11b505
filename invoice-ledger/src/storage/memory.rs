//! In-process store
//!
//! Every trait operation runs under one lock, so the CAS guarantees are the
//! same as the RocksDB store's. Used by tests and single-process deployments.

use super::{apply_submission, check_batch_member, check_batch_swap};
use super::{AuditStore, BatchStore, RecordStore};
use crate::error::{Error, Result};
use crate::types::{
    AuditCursor, AuditEvent, AuditFilter, BatchStatus, InvoiceRecord, NewAuditEvent, NewBatch,
    RecordDraft, RemisionBatch, SeriesBlock, SeriesId, SubmissionStatus, SubmissionUpdate,
    TenantId, VerificationSummary,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Default)]
struct SeriesState {
    ids: Vec<u64>,
    block: Option<SeriesBlock>,
    last_verification: Option<VerificationSummary>,
}

#[derive(Debug, Default)]
struct Tables {
    records: BTreeMap<u64, InvoiceRecord>,
    series: HashMap<SeriesId, SeriesState>,
    last_record_id: u64,
    batches: BTreeMap<u64, RemisionBatch>,
    last_batch_id: u64,
    audit: BTreeMap<AuditCursor, AuditEvent>,
    last_audit_id: u64,
}

/// In-memory implementation of all three stores
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored record, bypassing every ledger check.
    ///
    /// Simulates out-of-band tampering of the backing table.
    #[doc(hidden)]
    pub fn tamper_record(&self, record: InvoiceRecord) {
        let mut tables = self.tables.write();
        tables.records.insert(record.id, record);
    }
}

impl RecordStore for MemoryStore {
    fn append_record(&self, draft: RecordDraft, expected_tip: Option<u64>) -> Result<InvoiceRecord> {
        let mut tables = self.tables.write();

        let actual_tip = tables
            .series
            .get(&draft.series)
            .and_then(|state| state.ids.last().copied());
        if actual_tip != expected_tip {
            return Err(Error::ConcurrencyConflict {
                series: draft.series,
                expected_tip,
                actual_tip,
            });
        }

        tables.last_record_id += 1;
        let id = tables.last_record_id;
        let series = draft.series.clone();
        let record = draft.into_record(id);

        tables.records.insert(id, record.clone());
        tables.series.entry(series).or_default().ids.push(id);

        Ok(record)
    }

    fn get_record(&self, id: u64) -> Result<Option<InvoiceRecord>> {
        Ok(self.tables.read().records.get(&id).cloned())
    }

    fn tip(&self, series: &SeriesId) -> Result<Option<InvoiceRecord>> {
        let tables = self.tables.read();
        Ok(tables
            .series
            .get(series)
            .and_then(|state| state.ids.last())
            .and_then(|id| tables.records.get(id))
            .cloned())
    }

    fn scan_series(
        &self,
        series: &SeriesId,
        after_id: Option<u64>,
        upto_id: u64,
        limit: usize,
    ) -> Result<Vec<InvoiceRecord>> {
        let tables = self.tables.read();
        let Some(state) = tables.series.get(series) else {
            return Ok(Vec::new());
        };

        let start = match after_id {
            Some(after) => state.ids.partition_point(|id| *id <= after),
            None => 0,
        };

        Ok(state.ids[start..]
            .iter()
            .take_while(|id| **id <= upto_id)
            .take(limit)
            .filter_map(|id| tables.records.get(id).cloned())
            .collect())
    }

    fn series_len(&self, series: &SeriesId) -> Result<u64> {
        Ok(self
            .tables
            .read()
            .series
            .get(series)
            .map(|state| state.ids.len() as u64)
            .unwrap_or(0))
    }

    fn update_submission(&self, id: u64, update: SubmissionUpdate) -> Result<InvoiceRecord> {
        let mut tables = self.tables.write();
        let record = tables
            .records
            .get_mut(&id)
            .ok_or(Error::RecordNotFound(id))?;
        apply_submission(record, update)?;
        Ok(record.clone())
    }

    fn unbatched_pending(&self, tenant: &TenantId, limit: usize) -> Result<Vec<InvoiceRecord>> {
        let tables = self.tables.read();
        Ok(tables
            .records
            .values()
            .filter(|r| {
                &r.tenant_id == tenant
                    && r.submission_status == SubmissionStatus::Pending
                    && r.remision_batch_id.is_none()
            })
            .take(limit)
            .cloned()
            .collect())
    }

    fn tenants_with_unbatched(&self) -> Result<Vec<TenantId>> {
        let tables = self.tables.read();
        let tenants: BTreeSet<TenantId> = tables
            .records
            .values()
            .filter(|r| {
                r.submission_status == SubmissionStatus::Pending && r.remision_batch_id.is_none()
            })
            .map(|r| r.tenant_id.clone())
            .collect();
        Ok(tenants.into_iter().collect())
    }

    fn pending_count(&self, tenant: &TenantId) -> Result<u64> {
        let tables = self.tables.read();
        Ok(tables
            .records
            .values()
            .filter(|r| &r.tenant_id == tenant && r.submission_status == SubmissionStatus::Pending)
            .count() as u64)
    }

    fn series_block(&self, series: &SeriesId) -> Result<Option<SeriesBlock>> {
        Ok(self
            .tables
            .read()
            .series
            .get(series)
            .and_then(|state| state.block.clone()))
    }

    fn set_series_block(&self, series: &SeriesId, block: Option<SeriesBlock>) -> Result<()> {
        let mut tables = self.tables.write();
        tables.series.entry(series.clone()).or_default().block = block;
        Ok(())
    }

    fn record_verification(&self, series: &SeriesId, summary: VerificationSummary) -> Result<()> {
        let mut tables = self.tables.write();
        tables
            .series
            .entry(series.clone())
            .or_default()
            .last_verification = Some(summary);
        Ok(())
    }

    fn last_verification(&self, series: &SeriesId) -> Result<Option<VerificationSummary>> {
        Ok(self
            .tables
            .read()
            .series
            .get(series)
            .and_then(|state| state.last_verification.clone()))
    }
}

impl BatchStore for MemoryStore {
    fn create_batch(&self, new: NewBatch) -> Result<RemisionBatch> {
        let mut tables = self.tables.write();

        if new.record_ids.is_empty() {
            return Err(Error::Validation("Batch must contain records".to_string()));
        }
        for id in &new.record_ids {
            check_batch_member(tables.records.get(id), *id, &new.tenant_id)?;
        }

        tables.last_batch_id += 1;
        let batch_id = tables.last_batch_id;
        for id in &new.record_ids {
            if let Some(record) = tables.records.get_mut(id) {
                record.remision_batch_id = Some(batch_id);
            }
        }

        let batch = RemisionBatch {
            id: batch_id,
            tenant_id: new.tenant_id,
            environment: new.environment,
            status: BatchStatus::Queued,
            total_records: new.record_ids.len() as u32,
            record_ids: new.record_ids,
            accepted_records: 0,
            rejected_records: 0,
            attempts: 0,
            next_attempt_at: None,
            last_error: None,
            created_at: new.created_at,
            updated_at: new.created_at,
        };
        tables.batches.insert(batch_id, batch.clone());

        Ok(batch)
    }

    fn get_batch(&self, id: u64) -> Result<Option<RemisionBatch>> {
        Ok(self.tables.read().batches.get(&id).cloned())
    }

    fn compare_and_swap_batch(&self, expected: BatchStatus, next: &RemisionBatch) -> Result<bool> {
        let mut tables = self.tables.write();
        let current = tables
            .batches
            .get(&next.id)
            .ok_or(Error::BatchNotFound(next.id))?;

        if !check_batch_swap(current, expected, next)? {
            return Ok(false);
        }
        tables.batches.insert(next.id, next.clone());
        Ok(true)
    }

    fn list_batches(
        &self,
        tenant: Option<&TenantId>,
        status: Option<BatchStatus>,
    ) -> Result<Vec<RemisionBatch>> {
        let tables = self.tables.read();
        Ok(tables
            .batches
            .values()
            .filter(|b| tenant.map_or(true, |t| &b.tenant_id == t))
            .filter(|b| status.map_or(true, |s| b.status == s))
            .cloned()
            .collect())
    }

    fn release_records(&self, batch_id: u64) -> Result<u32> {
        let mut tables = self.tables.write();
        let record_ids = tables
            .batches
            .get(&batch_id)
            .ok_or(Error::BatchNotFound(batch_id))?
            .record_ids
            .clone();

        let mut released = 0;
        for id in record_ids {
            if let Some(record) = tables.records.get_mut(&id) {
                if record.remision_batch_id == Some(batch_id)
                    && record.submission_status == SubmissionStatus::Pending
                {
                    record.remision_batch_id = None;
                    released += 1;
                }
            }
        }
        Ok(released)
    }
}

impl AuditStore for MemoryStore {
    fn append_event(&self, event: NewAuditEvent, created_at: DateTime<Utc>) -> Result<AuditEvent> {
        let mut tables = self.tables.write();
        tables.last_audit_id += 1;

        let event = AuditEvent {
            id: tables.last_audit_id,
            tenant_id: event.tenant_id,
            event_type: event.event_type,
            severity: event.severity,
            message: event.message,
            details: event.details,
            created_at,
        };
        tables.audit.insert(AuditCursor::of(&event), event.clone());
        Ok(event)
    }

    fn page_events(
        &self,
        tenant: &TenantId,
        filter: &AuditFilter,
        after: Option<AuditCursor>,
        limit: usize,
    ) -> Result<Vec<AuditEvent>> {
        use std::ops::Bound;

        let tables = self.tables.read();
        let lower = match after {
            Some(cursor) => Bound::Excluded(cursor),
            None => Bound::Unbounded,
        };

        Ok(tables
            .audit
            .range((lower, Bound::Unbounded))
            .map(|(_, event)| event)
            .filter(|event| &event.tenant_id == tenant && filter.matches(event))
            .take(limit)
            .cloned()
            .collect())
    }
}
