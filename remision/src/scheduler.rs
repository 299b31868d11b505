//! Remision batch scheduler
//!
//! Freezes pending records into batches and drives each batch through the
//! gateway:
//!
//! ```text
//! queued -> processing -> submitted -> accepted | partially_rejected
//!              |
//!              +-> failed -> (backoff) -> queued
//!              +-> failed_terminal -> (manual retry) -> queued
//! queued -> cancelled
//! ```
//!
//! A batch is claimed with a `queued -> processing` compare-and-swap; after
//! that the claimant is its only writer. Gates (connection health, circuit
//! breaker, flow control) are checked before the claim, so a deferred batch
//! simply stays queued.

use crate::breaker::{CircuitBreaker, FlowControl};
use crate::config::Config;
use crate::error::TransportError;
use crate::gateway::{ConnectionProvider, GatewayAdapter, GatewayResponse, SubmissionRequest, Verdict};
use crate::retry::RetryPolicy;
use crate::types::{BatchDetail, DeferReason, DriveOutcome, QueueStatus, SweepSummary};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use invoice_ledger::types::{NewBatch, SubmissionUpdate};
use invoice_ledger::{
    AuditEventType, AuditSeverity, BatchStatus, BatchStore, InvoiceRecord, Ledger, NewAuditEvent,
    RemisionBatch, SubmissionStatus, TenantId,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Drives remision batches from `queued` to a terminal state
pub struct RemisionScheduler {
    ledger: Arc<Ledger>,
    batches: Arc<dyn BatchStore>,
    gateway: Arc<dyn GatewayAdapter>,
    connection: Arc<dyn ConnectionProvider>,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    flow: FlowControl,
    assembly: Mutex<()>,
    config: Config,
}

impl std::fmt::Debug for RemisionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemisionScheduler")
            .field("retry", &self.retry)
            .field("breaker", &self.breaker)
            .field("flow", &self.flow)
            .finish_non_exhaustive()
    }
}

impl RemisionScheduler {
    /// Create a scheduler; the clock and audit log come from the ledger
    pub fn new(
        ledger: Arc<Ledger>,
        batches: Arc<dyn BatchStore>,
        gateway: Arc<dyn GatewayAdapter>,
        connection: Arc<dyn ConnectionProvider>,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            ledger,
            batches,
            gateway,
            connection,
            retry: RetryPolicy::new(config.retry.clone()),
            breaker: CircuitBreaker::new(&config.breaker),
            flow: FlowControl::new(&config.flow_control),
            assembly: Mutex::new(()),
            config,
        })
    }

    /// Scheduler configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Circuit breaker state
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Freeze the unbatched pending records of a tenant into queued batches
    /// of at most `max_batch_size` records, oldest first.
    pub fn assemble_batches(&self, tenant: &TenantId) -> Result<Vec<RemisionBatch>> {
        let _guard = self.assembly.lock();
        let environment = self.config.environment_for(tenant);
        let mut created = Vec::new();

        loop {
            let pending = self
                .ledger
                .store()
                .unbatched_pending(tenant, self.config.scheduler.max_batch_size)?;
            if pending.is_empty() {
                break;
            }

            let batch = self.batches.create_batch(NewBatch {
                tenant_id: tenant.clone(),
                environment,
                record_ids: pending.iter().map(|r| r.id).collect(),
                created_at: self.now(),
            })?;
            info!(
                batch_id = batch.id,
                tenant_id = %tenant,
                environment = %environment,
                records = batch.total_records,
                "Remision batch created"
            );
            created.push(batch);
        }

        Ok(created)
    }

    /// Assemble batches for every tenant with unbatched pending records
    pub fn assemble_all(&self) -> Result<usize> {
        let mut created = 0;
        for tenant in self.ledger.store().tenants_with_unbatched()? {
            created += self.assemble_batches(&tenant)?.len();
        }
        Ok(created)
    }

    /// Claim a queued batch for this worker (`queued -> processing`).
    ///
    /// Returns `ClaimLost` if the batch is not queued any more; the loser must
    /// not act on the batch.
    pub fn claim(&self, batch_id: u64) -> Result<RemisionBatch> {
        let batch = self.load_batch(batch_id)?;
        if batch.status != BatchStatus::Queued {
            return Err(Error::ClaimLost(batch_id));
        }

        let mut next = batch.clone();
        next.status = BatchStatus::Processing;
        next.updated_at = self.now();
        if !self
            .batches
            .compare_and_swap_batch(BatchStatus::Queued, &next)?
        {
            debug!(batch_id, "Claim lost to another worker");
            return Err(Error::ClaimLost(batch_id));
        }

        let attempt = next.attempts + 1;
        info!(
            batch_id,
            tenant_id = %next.tenant_id,
            attempt,
            records = next.total_records,
            "Batch claimed"
        );
        self.audit(
            NewAuditEvent::new(
                next.tenant_id.clone(),
                AuditEventType::BatchSubmit,
                AuditSeverity::Info,
                format!("Batch {} submitted, attempt {}", batch_id, attempt),
            )
            .with_details(json!({
                "batch_id": batch_id,
                "attempt": attempt,
                "record_count": next.total_records,
                "environment": next.environment,
            })),
        );
        Ok(next)
    }

    /// Drive one batch: gate, claim, submit, write back.
    ///
    /// Transport failures are absorbed into the retry path and reported as
    /// [`DriveOutcome::RetryScheduled`] or a terminal `failed_terminal`.
    pub async fn drive(&self, batch_id: u64) -> Result<DriveOutcome> {
        let batch = self.load_batch(batch_id)?;
        if batch.status != BatchStatus::Queued {
            debug!(batch_id, status = %batch.status, "Batch not queued, skipping");
            return Ok(DriveOutcome::NotClaimed);
        }

        if let Some(reason) = self.gate() {
            info!(batch_id, ?reason, "Batch deferred");
            return Ok(DriveOutcome::Deferred(reason));
        }

        let batch = match self.claim(batch_id) {
            Ok(batch) => batch,
            Err(Error::ClaimLost(_)) => return Ok(DriveOutcome::NotClaimed),
            Err(e) => return Err(e),
        };

        self.submit(batch).await
    }

    /// Move failed batches whose backoff has elapsed back to queued
    pub fn requeue_due(&self) -> Result<usize> {
        let now = self.now();
        let mut requeued = 0;

        for batch in self.batches.list_batches(None, Some(BatchStatus::Failed))? {
            if batch.next_attempt_at.map_or(false, |at| at > now) {
                continue;
            }
            let mut next = batch.clone();
            next.status = BatchStatus::Queued;
            next.updated_at = now;
            if self
                .batches
                .compare_and_swap_batch(BatchStatus::Failed, &next)?
            {
                debug!(batch_id = batch.id, attempts = batch.attempts, "Batch re-queued");
                requeued += 1;
            }
        }

        Ok(requeued)
    }

    /// One sweep: re-queue due batches, assemble new ones, drive every queued
    /// batch with at most `worker_concurrency` in flight.
    pub async fn run_once(self: &Arc<Self>) -> Result<SweepSummary> {
        let mut summary = SweepSummary {
            requeued: self.requeue_due()?,
            ..SweepSummary::default()
        };

        if !self.connection.is_usable() {
            warn!("Connection unusable, skipping submission sweep");
            return Ok(summary);
        }

        summary.batches_created = self.assemble_all()?;

        let queued = self.batches.list_batches(None, Some(BatchStatus::Queued))?;
        let semaphore = Arc::new(Semaphore::new(self.config.scheduler.worker_concurrency));
        let mut join_set = JoinSet::new();

        for batch in queued {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| Error::Worker(format!("Semaphore error: {}", e)))?;
            let scheduler = Arc::clone(self);

            join_set.spawn(async move {
                let result = scheduler.drive(batch.id).await;
                drop(permit);
                (batch.id, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => summary.count(&outcome),
                Ok((batch_id, Err(e))) => {
                    error!(batch_id, error = %e, "Batch drive failed");
                    summary.errors += 1;
                }
                Err(e) => {
                    error!(error = %e, "Batch worker panicked");
                    summary.errors += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Sweep every `sweep_interval` until `shutdown` turns true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.scheduler.sweep_interval_ms,
            workers = self.config.scheduler.worker_concurrency,
            "Starting remision scheduler"
        );

        let mut interval = tokio::time::interval(self.config.scheduler.sweep_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_once().await {
                        Ok(summary) => debug!(?summary, "Sweep finished"),
                        Err(e) => warn!(error = %e, "Sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Remision scheduler stopped");
    }

    /// Cancel a batch that is still queued and release its records
    pub fn cancel(&self, batch_id: u64) -> Result<RemisionBatch> {
        let batch = self.load_batch(batch_id)?;
        if batch.status != BatchStatus::Queued {
            return Err(Error::InvalidState {
                batch_id,
                status: batch.status,
                operation: "cancel",
            });
        }

        let mut next = batch.clone();
        next.status = BatchStatus::Cancelled;
        next.updated_at = self.now();
        if !self
            .batches
            .compare_and_swap_batch(BatchStatus::Queued, &next)?
        {
            let current = self.load_batch(batch_id)?;
            return Err(Error::InvalidState {
                batch_id,
                status: current.status,
                operation: "cancel",
            });
        }

        let released = self.batches.release_records(batch_id)?;
        info!(batch_id, tenant_id = %next.tenant_id, released, "Batch cancelled");
        self.audit(
            NewAuditEvent::new(
                next.tenant_id.clone(),
                AuditEventType::BatchResult,
                AuditSeverity::Info,
                format!("Batch {} cancelled, {} records released", batch_id, released),
            )
            .with_details(json!({
                "batch_id": batch_id,
                "status": BatchStatus::Cancelled,
                "released": released,
            })),
        );
        self.record_finished(BatchStatus::Cancelled);
        Ok(next)
    }

    /// Re-queue a batch that ran out of attempts; membership is unchanged
    pub fn retry(&self, batch_id: u64) -> Result<RemisionBatch> {
        let batch = self.load_batch(batch_id)?;
        if batch.status != BatchStatus::FailedTerminal {
            return Err(Error::InvalidState {
                batch_id,
                status: batch.status,
                operation: "retry",
            });
        }

        let mut next = batch.clone();
        next.status = BatchStatus::Queued;
        next.attempts = 0;
        next.next_attempt_at = None;
        next.updated_at = self.now();
        if !self
            .batches
            .compare_and_swap_batch(BatchStatus::FailedTerminal, &next)?
        {
            let current = self.load_batch(batch_id)?;
            return Err(Error::InvalidState {
                batch_id,
                status: current.status,
                operation: "retry",
            });
        }

        info!(batch_id, tenant_id = %next.tenant_id, "Batch manually re-queued");
        self.audit(
            NewAuditEvent::new(
                next.tenant_id.clone(),
                AuditEventType::BatchRetryScheduled,
                AuditSeverity::Info,
                format!("Batch {} manually re-queued", batch_id),
            )
            .with_details(json!({
                "batch_id": batch_id,
                "previous_attempts": batch.attempts,
                "last_error": batch.last_error,
            })),
        );
        Ok(next)
    }

    /// Pending record count and batches per status for a tenant
    pub fn queue_status(&self, tenant: &TenantId) -> Result<QueueStatus> {
        let mut batches = HashMap::new();
        for batch in self.batches.list_batches(Some(tenant), None)? {
            *batches.entry(batch.status).or_insert(0) += 1;
        }

        Ok(QueueStatus {
            tenant_id: tenant.clone(),
            pending_records: self.ledger.store().pending_count(tenant)?,
            batches,
        })
    }

    /// Batch with its member records
    pub fn batch_detail(&self, batch_id: u64) -> Result<BatchDetail> {
        let batch = self.load_batch(batch_id)?;
        let records = self.load_members(&batch)?;
        Ok(BatchDetail { batch, records })
    }

    fn now(&self) -> DateTime<Utc> {
        self.ledger.clock().now()
    }

    fn load_batch(&self, batch_id: u64) -> Result<RemisionBatch> {
        Ok(self
            .batches
            .get_batch(batch_id)?
            .ok_or(invoice_ledger::Error::BatchNotFound(batch_id))?)
    }

    fn load_members(&self, batch: &RemisionBatch) -> Result<Vec<InvoiceRecord>> {
        batch
            .record_ids
            .iter()
            .map(|id| self.ledger.get_record(*id).map_err(Error::from))
            .collect()
    }

    /// First closed gate, if any. A granted flow-control slot is consumed.
    fn gate(&self) -> Option<DeferReason> {
        let now = self.now();
        if !self.connection.is_usable() {
            return Some(DeferReason::ConnectionUnusable);
        }
        if let Err(until) = self.breaker.check(now) {
            return Some(DeferReason::CircuitOpen { until });
        }
        if let Err(next_allowed) = self.flow.try_acquire(now) {
            return Some(DeferReason::FlowControl { next_allowed });
        }
        None
    }

    async fn submit(&self, batch: RemisionBatch) -> Result<DriveOutcome> {
        let members = self.load_members(&batch)?;
        let payload: Vec<InvoiceRecord> = members
            .into_iter()
            .filter(|r| !r.submission_status.is_terminal())
            .collect();
        let excluded = batch.record_ids.len() - payload.len();
        if excluded > 0 {
            debug!(batch_id = batch.id, excluded, "Records with known outcome left out");
        }

        if payload.is_empty() {
            let batch = self.transition(&batch, BatchStatus::Submitted, |_| {})?;
            return self.finish(batch);
        }

        let request =
            SubmissionRequest::new(batch.id, batch.tenant_id.clone(), batch.environment, payload);
        let timeout = self.config.gateway.timeout();
        let started = Instant::now();

        let result = match tokio::time::timeout(timeout, self.gateway.submit(&request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
        .and_then(|response| {
            if response.transport_ok {
                Ok(response)
            } else {
                Err(TransportError::ServerError(
                    "gateway did not accept the transport request".to_string(),
                ))
            }
        });

        if let Some(metrics) = self.ledger.metrics() {
            metrics.record_gateway_call(started.elapsed().as_secs_f64(), result.is_ok());
        }

        match result {
            Ok(response) => {
                self.breaker.record_success();
                self.apply_response(batch, &request, response)
            }
            Err(e) => {
                self.breaker.record_failure(self.now());
                self.fail_attempt(batch, e)
            }
        }
    }

    fn apply_response(
        &self,
        batch: RemisionBatch,
        request: &SubmissionRequest,
        response: GatewayResponse,
    ) -> Result<DriveOutcome> {
        let batch = self.transition(&batch, BatchStatus::Submitted, |b| {
            b.attempts += 1;
            b.next_attempt_at = None;
            b.last_error = None;
        })?;
        info!(
            batch_id = batch.id,
            records = request.records.len(),
            outcomes = response.outcomes.len(),
            "Gateway accepted transport"
        );

        let mut outcomes = HashMap::new();
        for outcome in &response.outcomes {
            outcomes.entry(outcome.record_hash.as_str()).or_insert(outcome);
        }

        for record in &request.records {
            let update = match outcomes.get(record.hash_self.as_str()) {
                Some(outcome) => {
                    if outcome.already_processed {
                        debug!(
                            batch_id = batch.id,
                            record_id = record.id,
                            "Outcome taken from echoed response"
                        );
                    }
                    match &outcome.verdict {
                        Verdict::Accepted => SubmissionUpdate {
                            status: SubmissionStatus::Accepted,
                            reason: None,
                            response_code: outcome.response_code.clone(),
                        },
                        Verdict::Rejected { reason } => SubmissionUpdate {
                            status: SubmissionStatus::Rejected,
                            reason: Some(if reason.trim().is_empty() {
                                "Rejected without reason".to_string()
                            } else {
                                reason.clone()
                            }),
                            response_code: outcome.response_code.clone(),
                        },
                    }
                }
                None => {
                    warn!(
                        batch_id = batch.id,
                        record_id = record.id,
                        "No outcome for record in gateway response"
                    );
                    SubmissionUpdate {
                        status: SubmissionStatus::Error,
                        reason: Some("No outcome in gateway response".to_string()),
                        response_code: None,
                    }
                }
            };
            let status = update.status;
            if let Err(e) = self.write_back(&batch, record.id, update) {
                self.write_back_failed(&batch, record, status, &e);
            }
        }

        self.finish(batch)
    }

    /// Set a record outcome once; terminal records are never overwritten
    fn write_back(&self, batch: &RemisionBatch, record_id: u64, update: SubmissionUpdate) -> Result<()> {
        let current = self.ledger.get_record(record_id)?;
        if current.submission_status.is_terminal() {
            self.anomaly(batch, &current, update.status);
            return Ok(());
        }

        if current.submission_status == SubmissionStatus::Pending
            && update.status != SubmissionStatus::Error
        {
            self.ledger.set_submission_status(
                record_id,
                SubmissionUpdate::status(SubmissionStatus::Submitted),
            )?;
        }

        let status = update.status;
        match self.ledger.set_submission_status(record_id, update) {
            Ok(_) => {
                debug!(batch_id = batch.id, record_id, status = %status, "Outcome written back");
                Ok(())
            }
            Err(invoice_ledger::Error::InvalidSubmissionTransition { .. }) => {
                let current = self.ledger.get_record(record_id)?;
                self.anomaly(batch, &current, status);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn anomaly(&self, batch: &RemisionBatch, record: &InvoiceRecord, attempted: SubmissionStatus) {
        warn!(
            batch_id = batch.id,
            record_id = record.id,
            current = %record.submission_status,
            attempted = %attempted,
            "Record already has a terminal status, outcome ignored"
        );
        self.audit(
            NewAuditEvent::new(
                record.tenant_id.clone(),
                AuditEventType::RecordStatusAnomaly,
                AuditSeverity::Warning,
                format!(
                    "Record {} is already {}, {} ignored",
                    record.id, record.submission_status, attempted
                ),
            )
            .with_details(json!({
                "batch_id": batch.id,
                "record_id": record.id,
                "current": record.submission_status,
                "attempted": attempted,
            })),
        );
    }

    /// Outcome lost to a storage failure; the batch still finishes
    fn write_back_failed(
        &self,
        batch: &RemisionBatch,
        record: &InvoiceRecord,
        attempted: SubmissionStatus,
        cause: &Error,
    ) {
        error!(
            batch_id = batch.id,
            record_id = record.id,
            attempted = %attempted,
            error = %cause,
            "Failed to write back record outcome"
        );
        self.audit(
            NewAuditEvent::new(
                record.tenant_id.clone(),
                AuditEventType::RecordStatusAnomaly,
                AuditSeverity::Error,
                format!(
                    "Record {} outcome {} could not be stored: {}",
                    record.id, attempted, cause
                ),
            )
            .with_details(json!({
                "batch_id": batch.id,
                "record_id": record.id,
                "attempted": attempted,
                "error": cause.to_string(),
            })),
        );
    }

    fn finish(&self, batch: RemisionBatch) -> Result<DriveOutcome> {
        let members = self.load_members(&batch)?;
        let accepted = members
            .iter()
            .filter(|r| r.submission_status == SubmissionStatus::Accepted)
            .count() as u32;
        let rejected = members.len() as u32 - accepted;
        let status = if rejected == 0 {
            BatchStatus::Accepted
        } else {
            BatchStatus::PartiallyRejected
        };

        let batch = self.transition(&batch, status, |b| {
            b.accepted_records = accepted;
            b.rejected_records = rejected;
        })?;

        info!(
            batch_id = batch.id,
            tenant_id = %batch.tenant_id,
            status = %status,
            accepted,
            rejected,
            "Batch finished"
        );
        let severity = if status == BatchStatus::Accepted {
            AuditSeverity::Info
        } else {
            AuditSeverity::Warning
        };
        self.audit(
            NewAuditEvent::new(
                batch.tenant_id.clone(),
                AuditEventType::BatchResult,
                severity,
                format!(
                    "Batch {} {}: {} accepted, {} rejected",
                    batch.id, status, accepted, rejected
                ),
            )
            .with_details(json!({
                "batch_id": batch.id,
                "status": status,
                "accepted": accepted,
                "rejected": rejected,
                "attempts": batch.attempts,
            })),
        );
        self.record_finished(status);

        Ok(DriveOutcome::Completed {
            status,
            accepted,
            rejected,
        })
    }

    fn fail_attempt(&self, batch: RemisionBatch, cause: TransportError) -> Result<DriveOutcome> {
        let now = self.now();
        let attempts = batch.attempts + 1;
        let message = cause.to_string();

        if self.retry.is_exhausted(attempts) {
            let batch = self.transition(&batch, BatchStatus::FailedTerminal, |b| {
                b.attempts = attempts;
                b.next_attempt_at = None;
                b.last_error = Some(message.clone());
            })?;
            error!(
                batch_id = batch.id,
                tenant_id = %batch.tenant_id,
                attempts,
                error = %cause,
                "Batch failed terminally, manual intervention required"
            );
            self.audit(
                NewAuditEvent::new(
                    batch.tenant_id.clone(),
                    AuditEventType::BatchResult,
                    AuditSeverity::Error,
                    format!("Batch {} failed after {} attempts", batch.id, attempts),
                )
                .with_details(json!({
                    "batch_id": batch.id,
                    "status": BatchStatus::FailedTerminal,
                    "attempts": attempts,
                    "error": message,
                })),
            );
            self.record_finished(BatchStatus::FailedTerminal);
            return Ok(DriveOutcome::Completed {
                status: BatchStatus::FailedTerminal,
                accepted: 0,
                rejected: 0,
            });
        }

        let next_attempt_at = self.retry.next_attempt_at(now, attempts);
        let batch = self.transition(&batch, BatchStatus::Failed, |b| {
            b.attempts = attempts;
            b.next_attempt_at = Some(next_attempt_at);
            b.last_error = Some(message.clone());
        })?;
        warn!(
            batch_id = batch.id,
            attempts,
            max_attempts = self.retry.max_attempts(),
            next_attempt_at = %next_attempt_at,
            error = %cause,
            "Transport failed, retry scheduled"
        );
        self.audit(
            NewAuditEvent::new(
                batch.tenant_id.clone(),
                AuditEventType::BatchRetryScheduled,
                AuditSeverity::Warning,
                format!(
                    "Batch {} attempt {} failed, retry at {}",
                    batch.id, attempts, next_attempt_at
                ),
            )
            .with_details(json!({
                "batch_id": batch.id,
                "attempts": attempts,
                "next_attempt_at": next_attempt_at,
                "error": message,
            })),
        );

        Ok(DriveOutcome::RetryScheduled {
            attempts,
            next_attempt_at,
        })
    }

    /// Single-writer transition of a claimed batch
    fn transition<F>(&self, batch: &RemisionBatch, to: BatchStatus, update: F) -> Result<RemisionBatch>
    where
        F: FnOnce(&mut RemisionBatch),
    {
        let mut next = batch.clone();
        next.status = to;
        next.updated_at = self.now();
        update(&mut next);

        if !self.batches.compare_and_swap_batch(batch.status, &next)? {
            error!(
                batch_id = batch.id,
                from = %batch.status,
                to = %to,
                "Claimed batch changed under its claimant"
            );
            return Err(Error::ClaimLost(batch.id));
        }
        Ok(next)
    }

    fn record_finished(&self, status: BatchStatus) {
        if let Some(metrics) = self.ledger.metrics() {
            metrics.record_batch_finished(status.as_str());
        }
    }

    fn audit(&self, event: NewAuditEvent) {
        let event_type = event.event_type;
        if let Err(e) = self.ledger.audit().append(event) {
            error!(event_type = %event_type, error = %e, "Failed to write audit event");
            if let Some(metrics) = self.ledger.metrics() {
                metrics.record_audit_failure(event_type.as_str());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::{MockGateway, StaticConnection};
    use chrono::{NaiveDate, TimeZone};
    use invoice_ledger::config::{AuditConfig, LedgerConfig};
    use invoice_ledger::{
        AuditLog, InvoiceFields, InvoiceKind, ManualClock, MemoryStore, RecordType, SeriesId,
        SeriesKey,
    };
    use rust_decimal::Decimal;

    struct Fixture {
        ledger: Arc<Ledger>,
        scheduler: Arc<RemisionScheduler>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap(),
        ));
        let audit = AuditLog::new(store.clone(), clock.clone(), &AuditConfig::default());
        let ledger = Arc::new(Ledger::new(store.clone(), audit, clock, LedgerConfig::default()));

        let mut config = Config::default();
        config.scheduler.max_batch_size = 2;
        config.flow_control.min_interval_secs = 0;
        let scheduler = RemisionScheduler::new(
            ledger.clone(),
            store,
            Arc::new(MockGateway::new()),
            Arc::new(StaticConnection::default()),
            config,
        )
        .unwrap();

        Fixture {
            ledger,
            scheduler: Arc::new(scheduler),
        }
    }

    fn append(ledger: &Ledger, tenant: &str, n: u64) -> InvoiceRecord {
        let series = SeriesId::new(TenantId::new(tenant), SeriesKey::new("B12345678"));
        ledger
            .append(
                &series,
                InvoiceFields {
                    record_type: RecordType::Issuance,
                    invoice_number: format!("VF-2026-{}", n),
                    issue_date: NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
                    invoice_kind: InvoiceKind::F1,
                    taxable_base: Decimal::new(5000, 2),
                    tax_rate: Decimal::new(2100, 2),
                    tax_amount: Decimal::new(1050, 2),
                    total_amount: Decimal::new(6050, 2),
                },
            )
            .unwrap()
    }

    #[test]
    fn test_assemble_respects_max_batch_size() {
        let f = fixture();
        for n in 1..=5 {
            append(&f.ledger, "acme", n);
        }
        append(&f.ledger, "globex", 1);

        let batches = f.scheduler.assemble_batches(&TenantId::new("acme")).unwrap();
        let sizes: Vec<u32> = batches.iter().map(|b| b.total_records).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(batches.iter().all(|b| b.status == BatchStatus::Queued));

        // Records already frozen into a batch are not picked up again
        assert!(f
            .scheduler
            .assemble_batches(&TenantId::new("acme"))
            .unwrap()
            .is_empty());
        assert_eq!(f.scheduler.assemble_all().unwrap(), 1);
    }

    #[test]
    fn test_claim_is_exclusive() {
        let f = fixture();
        append(&f.ledger, "acme", 1);
        let batch = f.scheduler.assemble_batches(&TenantId::new("acme")).unwrap()[0].clone();

        let claimed = f.scheduler.claim(batch.id).unwrap();
        assert_eq!(claimed.status, BatchStatus::Processing);
        assert!(matches!(
            f.scheduler.claim(batch.id),
            Err(Error::ClaimLost(id)) if id == batch.id
        ));
    }

    #[test]
    fn test_cancel_only_while_queued() {
        let f = fixture();
        append(&f.ledger, "acme", 1);
        append(&f.ledger, "acme", 2);
        append(&f.ledger, "acme", 3);
        let batches = f.scheduler.assemble_batches(&TenantId::new("acme")).unwrap();

        let cancelled = f.scheduler.cancel(batches[0].id).unwrap();
        assert_eq!(cancelled.status, BatchStatus::Cancelled);
        for id in &batches[0].record_ids {
            assert!(f.ledger.get_record(*id).unwrap().remision_batch_id.is_none());
        }

        f.scheduler.claim(batches[1].id).unwrap();
        let err = f.scheduler.cancel(batches[1].id).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                status: BatchStatus::Processing,
                operation: "cancel",
                ..
            }
        ));
    }

    #[test]
    fn test_retry_requires_terminal_failure() {
        let f = fixture();
        append(&f.ledger, "acme", 1);
        let batch = f.scheduler.assemble_batches(&TenantId::new("acme")).unwrap()[0].clone();

        let err = f.scheduler.retry(batch.id).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                status: BatchStatus::Queued,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_drive_accepts_whole_batch() {
        let f = fixture();
        append(&f.ledger, "acme", 1);
        append(&f.ledger, "acme", 2);
        let batch = f.scheduler.assemble_batches(&TenantId::new("acme")).unwrap()[0].clone();

        let outcome = f.scheduler.drive(batch.id).await.unwrap();
        assert_eq!(
            outcome,
            DriveOutcome::Completed {
                status: BatchStatus::Accepted,
                accepted: 2,
                rejected: 0,
            }
        );

        let detail = f.scheduler.batch_detail(batch.id).unwrap();
        assert_eq!(detail.batch.status, BatchStatus::Accepted);
        assert_eq!(detail.batch.attempts, 1);
        assert!(detail
            .records
            .iter()
            .all(|r| r.submission_status == SubmissionStatus::Accepted));

        // A finished batch is not driven again
        assert_eq!(
            f.scheduler.drive(batch.id).await.unwrap(),
            DriveOutcome::NotClaimed
        );
    }

    #[tokio::test]
    async fn test_queue_status_counts() {
        let f = fixture();
        for n in 1..=3 {
            append(&f.ledger, "acme", n);
        }
        let tenant = TenantId::new("acme");
        let batches = f.scheduler.assemble_batches(&tenant).unwrap();
        f.scheduler.drive(batches[0].id).await.unwrap();

        let status = f.scheduler.queue_status(&tenant).unwrap();
        assert_eq!(status.pending_records, 1);
        assert_eq!(status.count(BatchStatus::Accepted), 1);
        assert_eq!(status.count(BatchStatus::Queued), 1);
        assert_eq!(status.count(BatchStatus::Failed), 0);
    }
}
