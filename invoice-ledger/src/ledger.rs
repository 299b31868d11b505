//! Record ledger
//!
//! Append-only creation of chain records. Appends to one series are
//! serialized twice over: an in-process lock per series, and a
//! compare-and-swap on the stored tip so writers in other processes (or other
//! `Ledger` instances over the same store) cannot fork the chain.
//!
//! # Example
//!
//! ```no_run
//! use invoice_ledger::{
//!     AuditLog, Config, Ledger, MemoryStore, SeriesId, SeriesKey, SystemClock, TenantId,
//! };
//! use std::sync::Arc;
//!
//! let config = Config::default();
//! let store = Arc::new(MemoryStore::new());
//! let clock = Arc::new(SystemClock);
//! let audit = AuditLog::new(store.clone(), clock.clone(), &config.audit);
//! let ledger = Ledger::new(store, audit, clock, config.ledger);
//!
//! let series = SeriesId::new(TenantId::new("acme"), SeriesKey::for_issuer("B12345678").unwrap());
//! assert!(ledger.read_tip(&series).unwrap().is_none());
//! ```

use crate::audit::AuditLog;
use crate::clock::Clock;
use crate::config::LedgerConfig;
use crate::crypto;
use crate::metrics::Metrics;
use crate::storage::RecordStore;
use crate::types::{
    AuditEventType, AuditSeverity, ChainStatus, HashVersion, InvoiceFields, InvoiceRecord,
    NewAuditEvent, RecordDraft, RecordType, SeriesId, SubmissionUpdate,
};
use crate::{Error, Result};
use chrono::Duration;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// Main ledger interface
pub struct Ledger {
    store: Arc<dyn RecordStore>,
    audit: AuditLog,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
    tip_locks: DashMap<SeriesId, Arc<Mutex<()>>>,
    metrics: Option<Arc<Metrics>>,
}

impl Ledger {
    /// Create a ledger over a record store
    pub fn new(
        store: Arc<dyn RecordStore>,
        audit: AuditLog,
        clock: Arc<dyn Clock>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
            config,
            tip_locks: DashMap::new(),
            metrics: None,
        }
    }

    /// Attach metrics
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Append an issuance record to a series.
    ///
    /// Concurrency conflicts are retried with a fresh tip read up to
    /// `max_conflict_retries` times before they are returned.
    pub fn append(&self, series: &SeriesId, fields: InvoiceFields) -> Result<InvoiceRecord> {
        if fields.record_type != RecordType::Issuance {
            return Err(Error::Validation(
                "Cancellations are appended with append_cancellation".to_string(),
            ));
        }
        self.with_conflict_retries(series, || self.try_append(series, fields.clone()))
    }

    /// Single append attempt; a concurrency conflict is returned as-is
    pub fn try_append(&self, series: &SeriesId, fields: InvoiceFields) -> Result<InvoiceRecord> {
        self.validate(&fields)?;

        let started = Instant::now();
        let record = {
            let lock = self.tip_lock(series);
            let _guard = lock.lock();
            self.append_locked(series, fields)?
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_append(started.elapsed().as_secs_f64());
        }
        tracing::info!(
            tenant_id = %record.tenant_id,
            series_key = %record.series_key,
            record_id = record.id,
            invoice_number = %record.fields.invoice_number,
            "Record appended"
        );

        self.audit_append(
            &record,
            AuditEventType::RecordCreate,
            format!("Record {} created", record.fields.invoice_number),
        );
        Ok(record)
    }

    /// Append a cancellation of a previously issued record.
    ///
    /// The cancellation copies the original's business fields and joins the
    /// original's series. Only issuance records can be cancelled, once.
    pub fn append_cancellation(&self, original_id: u64) -> Result<InvoiceRecord> {
        let original = self.get_record(original_id)?;
        if original.fields.record_type != RecordType::Issuance {
            return Err(Error::Validation(format!(
                "Record {} is a cancellation and cannot be cancelled",
                original_id
            )));
        }

        let series = original.series_id();
        let mut fields = original.fields.clone();
        fields.record_type = RecordType::Cancellation;

        let record = self.with_conflict_retries(&series, || {
            let lock = self.tip_lock(&series);
            let _guard = lock.lock();
            if self.find_cancellation(&original)?.is_some() {
                return Err(Error::Validation(format!(
                    "Record {} is already cancelled",
                    original_id
                )));
            }
            self.append_locked(&series, fields.clone())
        })?;

        tracing::info!(
            tenant_id = %record.tenant_id,
            series_key = %record.series_key,
            record_id = record.id,
            original_id,
            "Cancellation appended"
        );

        self.audit_append(
            &record,
            AuditEventType::RecordCancel,
            format!("Record {} cancelled", record.fields.invoice_number),
        );
        Ok(record)
    }

    /// Current tip of a series; lock-free
    pub fn read_tip(&self, series: &SeriesId) -> Result<Option<InvoiceRecord>> {
        self.store.tip(series)
    }

    /// Ordered scan of a series, bounded by the tip at call time
    pub fn read_chain(&self, series: &SeriesId) -> Result<ChainScan> {
        let upto_id = self.store.tip(series)?.map(|tip| tip.id);
        Ok(ChainScan::new(
            Arc::clone(&self.store),
            series.clone(),
            upto_id,
            self.config.scan_page_size,
        ))
    }

    /// Record by ID
    pub fn get_record(&self, id: u64) -> Result<InvoiceRecord> {
        self.store.get_record(id)?.ok_or(Error::RecordNotFound(id))
    }

    /// Write back the transmission outcome of a record.
    ///
    /// Only forward transitions are accepted; a terminal status is never
    /// overwritten and yields `InvalidSubmissionTransition`.
    pub fn set_submission_status(&self, id: u64, update: SubmissionUpdate) -> Result<InvoiceRecord> {
        let status = update.status;
        let record = self.store.update_submission(id, update)?;
        tracing::debug!(
            record_id = id,
            tenant_id = %record.tenant_id,
            series_key = %record.series_key,
            status = %status,
            "Submission status updated"
        );
        Ok(record)
    }

    /// Total, tip hash, write block and last verification of a series
    pub fn chain_status(&self, series: &SeriesId) -> Result<ChainStatus> {
        Ok(ChainStatus {
            series: series.clone(),
            total_records: self.store.series_len(series)?,
            tip_hash: self.store.tip(series)?.map(|tip| tip.hash_self),
            block: self.store.series_block(series)?,
            last_verification: self.store.last_verification(series)?,
        })
    }

    /// Clear the write block of a series after an operator resolved the incident
    pub fn resolve_incident(&self, series: &SeriesId, note: &str) -> Result<()> {
        let lock = self.tip_lock(series);
        let _guard = lock.lock();

        let block = self.store.series_block(series)?.ok_or_else(|| {
            Error::Validation(format!("Series {} has no open integrity incident", series))
        })?;
        self.store.set_series_block(series, None)?;

        tracing::warn!(
            tenant_id = %series.tenant_id,
            series_key = %series.series_key,
            note,
            "Integrity incident resolved, series unblocked"
        );

        self.audit.append(
            NewAuditEvent::new(
                series.tenant_id.clone(),
                AuditEventType::ChainIncidentResolved,
                AuditSeverity::Warning,
                format!("Integrity incident on {} resolved", series),
            )
            .with_details(json!({
                "series_key": series.series_key.as_str(),
                "note": note,
                "block_reason": block.reason,
                "break_count": block.break_count,
                "blocked_at": block.blocked_at,
            })),
        )?;
        Ok(())
    }

    /// Underlying record store
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Audit log used by this ledger
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Injected clock
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Attached metrics
    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.as_ref()
    }

    fn tip_lock(&self, series: &SeriesId) -> Arc<Mutex<()>> {
        Arc::clone(self.tip_locks.entry(series.clone()).or_default().value())
    }

    fn validate(&self, fields: &InvoiceFields) -> Result<()> {
        fields.validate()?;

        let latest =
            self.clock.now().date_naive() + Duration::days(self.config.max_issue_date_skew_days);
        if fields.issue_date > latest {
            return Err(Error::Validation(format!(
                "Issue date {} is in the future",
                fields.issue_date
            )));
        }
        Ok(())
    }

    /// Read tip, hash and persist. Caller holds the series lock.
    fn append_locked(&self, series: &SeriesId, fields: InvoiceFields) -> Result<InvoiceRecord> {
        if let Some(block) = self.store.series_block(series)? {
            return Err(Error::ChainIntegrity {
                series: series.clone(),
                reason: block.reason,
            });
        }

        let tip = self.store.tip(series)?;
        let expected_tip = tip.as_ref().map(|t| t.id);
        let hash_previous = tip.map(|t| t.hash_self).unwrap_or_default();

        let hash_version = HashVersion::CURRENT;
        let hash_self = crypto::record_hash(
            hash_version,
            &series.tenant_id,
            &series.series_key,
            &fields,
            &hash_previous,
        );

        let draft = RecordDraft {
            series: series.clone(),
            fields,
            hash_version,
            hash_self,
            hash_previous,
            created_at: self.clock.now(),
        };
        self.store.append_record(draft, expected_tip)
    }

    fn with_conflict_retries<F>(&self, series: &SeriesId, mut attempt: F) -> Result<InvoiceRecord>
    where
        F: FnMut() -> Result<InvoiceRecord>,
    {
        let mut retries = 0;
        loop {
            match attempt() {
                Err(e) if e.is_retriable() => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_conflict();
                    }
                    if retries >= self.config.max_conflict_retries {
                        tracing::error!(
                            tenant_id = %series.tenant_id,
                            series_key = %series.series_key,
                            retries,
                            "Concurrency conflict persisted, giving up"
                        );
                        return Err(e);
                    }
                    retries += 1;
                    tracing::warn!(
                        tenant_id = %series.tenant_id,
                        series_key = %series.series_key,
                        retry = retries,
                        "Tip moved during append, retrying"
                    );
                }
                other => return other,
            }
        }
    }

    fn find_cancellation(&self, original: &InvoiceRecord) -> Result<Option<InvoiceRecord>> {
        for record in self.read_chain(&original.series_id())? {
            let record = record?;
            if record.id > original.id
                && record.fields.record_type == RecordType::Cancellation
                && record.fields.invoice_number == original.fields.invoice_number
                && record.fields.issue_date == original.fields.issue_date
            {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn audit_append(&self, record: &InvoiceRecord, event_type: AuditEventType, message: String) {
        let event = NewAuditEvent::new(
            record.tenant_id.clone(),
            event_type,
            AuditSeverity::Info,
            message,
        )
        .with_details(json!({
            "record_id": record.id,
            "series_key": record.series_key.as_str(),
            "invoice_number": record.fields.invoice_number,
            "hash_self": record.hash_self,
        }));

        // The record is already persisted; a failed audit write must not
        // invite the caller to append it again.
        if let Err(e) = self.audit.append(event) {
            tracing::error!(
                record_id = record.id,
                error = %e,
                "Failed to write audit event for appended record"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_audit_failure(event_type.as_str());
            }
        }
    }
}

/// Restartable, ordered scan of one series
///
/// Bounded by the tip ID captured at creation: records appended afterwards
/// are not yielded. Records are fetched a page at a time.
#[derive(Clone)]
pub struct ChainScan {
    store: Arc<dyn RecordStore>,
    series: SeriesId,
    upto_id: Option<u64>,
    page_size: usize,
    last_id: Option<u64>,
    buffer: VecDeque<InvoiceRecord>,
    exhausted: bool,
}

impl ChainScan {
    fn new(
        store: Arc<dyn RecordStore>,
        series: SeriesId,
        upto_id: Option<u64>,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            series,
            exhausted: upto_id.is_none(),
            upto_id,
            page_size: page_size.max(1),
            last_id: None,
            buffer: VecDeque::new(),
        }
    }

    /// Tip ID the scan is bounded by; `None` for an empty series
    pub fn snapshot_tip(&self) -> Option<u64> {
        self.upto_id
    }

    /// ID of the last yielded record
    pub fn position(&self) -> Option<u64> {
        self.last_id
    }

    /// Continue after record `id`
    pub fn resume_after(mut self, id: Option<u64>) -> Self {
        self.last_id = id;
        self.buffer.clear();
        self.exhausted = self.upto_id.is_none();
        self
    }

    /// Start over from the genesis record
    pub fn restart(&mut self) {
        self.last_id = None;
        self.buffer.clear();
        self.exhausted = self.upto_id.is_none();
    }

    fn fill(&mut self) -> Result<()> {
        let Some(upto_id) = self.upto_id else {
            self.exhausted = true;
            return Ok(());
        };
        let page = self
            .store
            .scan_series(&self.series, self.last_id, upto_id, self.page_size)?;
        if page.len() < self.page_size || page.last().map(|r| r.id) == Some(upto_id) {
            self.exhausted = true;
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl Iterator for ChainScan {
    type Item = Result<InvoiceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                return Some(Err(e));
            }
        }

        let record = self.buffer.pop_front()?;
        self.last_id = Some(record.id);
        Some(Ok(record))
    }
}
