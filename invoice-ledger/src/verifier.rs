//! Chain verifier
//!
//! Read-only scanner that recomputes every `hash_self` and cross-checks every
//! link. It reads through the same bounded scan as everyone else, so it never
//! takes a tip lock: a record still being appended when verification starts
//! is simply not part of the snapshot.
//!
//! Any break blocks further appends on the series until an operator resolves
//! the incident.

use crate::ledger::Ledger;
use crate::types::{
    AuditEventType, AuditSeverity, InvoiceRecord, NewAuditEvent, SeriesBlock, SeriesId,
    VerificationSummary,
};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;

/// Kind of chain break
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    /// Recomputed `hash_self` differs from the stored one (field tampering)
    HashMismatch,
    /// Stored `hash_previous` differs from the previous record's `hash_self`
    LinkMismatch,
    /// A second record with an empty `hash_previous`
    ForkedGenesis,
}

impl BreakKind {
    /// Name
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakKind::HashMismatch => "hash_mismatch",
            BreakKind::LinkMismatch => "link_mismatch",
            BreakKind::ForkedGenesis => "forked_genesis",
        }
    }
}

impl fmt::Display for BreakKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One detected break
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    /// Zero-based position in the series
    pub position: u64,
    /// Offending record
    pub record_id: u64,
    /// Value the chain requires
    pub expected_hash: String,
    /// Value found in storage
    pub actual_hash: String,
    /// Kind
    pub kind: BreakKind,
}

/// Result of verifying one series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Series
    pub series: SeriesId,
    /// Records scanned
    pub total_records: u64,
    /// Breaks found, in chain order
    pub breaks: Vec<ChainBreak>,
    /// Stored hash of the last scanned record
    pub tip_hash: Option<String>,
    /// When the verification ran
    pub verified_at: DateTime<Utc>,
}

impl IntegrityReport {
    /// Number of breaks
    pub fn breaks_found(&self) -> usize {
        self.breaks.len()
    }

    /// No breaks
    pub fn is_intact(&self) -> bool {
        self.breaks.is_empty()
    }

    fn summary(&self) -> VerificationSummary {
        VerificationSummary {
            total_records: self.total_records,
            breaks_found: self.breaks.len() as u32,
            tip_hash: self.tip_hash.clone(),
            verified_at: self.verified_at,
        }
    }
}

/// Incremental link and hash checker over records in ascending ID order
#[derive(Debug, Default)]
pub struct ChainChecker {
    position: u64,
    previous_hash: Option<String>,
    breaks: Vec<ChainBreak>,
}

impl ChainChecker {
    /// Empty checker
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the next record
    pub fn feed(&mut self, record: &InvoiceRecord) {
        let recomputed = record.recompute_hash();
        if recomputed != record.hash_self {
            self.push(record, recomputed, record.hash_self.clone(), BreakKind::HashMismatch);
        }

        match self.previous_hash.take() {
            None if !record.hash_previous.is_empty() => {
                self.push(
                    record,
                    String::new(),
                    record.hash_previous.clone(),
                    BreakKind::LinkMismatch,
                );
            }
            None => {}
            Some(previous) if record.hash_previous.is_empty() => {
                self.push(record, previous, String::new(), BreakKind::ForkedGenesis);
            }
            Some(previous) if record.hash_previous != previous => {
                self.push(
                    record,
                    previous,
                    record.hash_previous.clone(),
                    BreakKind::LinkMismatch,
                );
            }
            Some(_) => {}
        }

        // Links are checked against the stored hash, so one tampered record
        // yields one break rather than two
        self.previous_hash = Some(record.hash_self.clone());
        self.position += 1;
    }

    /// Records fed so far
    pub fn total(&self) -> u64 {
        self.position
    }

    /// Stored hash of the last record fed
    pub fn tip_hash(&self) -> Option<&str> {
        self.previous_hash.as_deref()
    }

    /// Breaks found so far
    pub fn into_breaks(self) -> Vec<ChainBreak> {
        self.breaks
    }

    fn push(&mut self, record: &InvoiceRecord, expected: String, actual: String, kind: BreakKind) {
        self.breaks.push(ChainBreak {
            position: self.position,
            record_id: record.id,
            expected_hash: expected,
            actual_hash: actual,
            kind,
        });
    }
}

/// Check an in-memory chain; records must be in ascending ID order
pub fn check_chain<'a, I>(records: I) -> Vec<ChainBreak>
where
    I: IntoIterator<Item = &'a InvoiceRecord>,
{
    let mut checker = ChainChecker::new();
    for record in records {
        checker.feed(record);
    }
    checker.into_breaks()
}

/// Chain verifier
pub struct ChainVerifier {
    ledger: Arc<Ledger>,
}

impl ChainVerifier {
    /// Verifier over a ledger's store, audit log and clock
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    /// Verify one series.
    ///
    /// Blocks the series on any break, then writes one `CHAIN_VERIFY` event
    /// plus one `CHAIN_BREAK_DETECTED` event per break. A failed audit write
    /// is returned after the block is in place.
    pub fn verify(&self, series: &SeriesId) -> Result<IntegrityReport> {
        let mut checker = ChainChecker::new();
        for record in self.ledger.read_chain(series)? {
            checker.feed(&record?);
        }

        let report = IntegrityReport {
            series: series.clone(),
            total_records: checker.total(),
            tip_hash: checker.tip_hash().map(str::to_string),
            breaks: checker.into_breaks(),
            verified_at: self.ledger.clock().now(),
        };

        if let Some(first) = report.breaks.first() {
            let block = SeriesBlock {
                reason: format!(
                    "{} chain break(s), first {} at position {} (record {})",
                    report.breaks.len(),
                    first.kind,
                    first.position,
                    first.record_id
                ),
                break_count: report.breaks.len() as u32,
                blocked_at: report.verified_at,
            };
            self.ledger.store().set_series_block(series, Some(block))?;
        }
        self.ledger
            .store()
            .record_verification(series, report.summary())?;

        if let Some(metrics) = self.ledger.metrics() {
            metrics.record_verification(report.breaks.len());
        }

        // The block above stands even when the audit store is down
        self.write_audit(&report)?;

        if report.is_intact() {
            tracing::info!(
                tenant_id = %series.tenant_id,
                series_key = %series.series_key,
                total_records = report.total_records,
                "Chain verified intact"
            );
        } else {
            tracing::error!(
                tenant_id = %series.tenant_id,
                series_key = %series.series_key,
                total_records = report.total_records,
                breaks = report.breaks.len(),
                "Chain integrity broken, series blocked"
            );
        }

        Ok(report)
    }

    fn write_audit(&self, report: &IntegrityReport) -> Result<()> {
        let tenant_id = &report.series.tenant_id;
        let audit = self.ledger.audit();

        let (severity, message) = if report.is_intact() {
            (
                AuditSeverity::Info,
                format!(
                    "Chain {} verified: {} records intact",
                    report.series, report.total_records
                ),
            )
        } else {
            (
                AuditSeverity::Critical,
                format!(
                    "Chain {} verified: {} break(s) in {} records",
                    report.series,
                    report.breaks.len(),
                    report.total_records
                ),
            )
        };

        audit.append(
            NewAuditEvent::new(tenant_id.clone(), AuditEventType::ChainVerify, severity, message)
                .with_details(json!({
                    "series_key": report.series.series_key.as_str(),
                    "total_records": report.total_records,
                    "breaks_found": report.breaks.len(),
                    "tip_hash": report.tip_hash,
                })),
        )?;

        for chain_break in &report.breaks {
            audit.append(
                NewAuditEvent::new(
                    tenant_id.clone(),
                    AuditEventType::ChainBreakDetected,
                    AuditSeverity::Critical,
                    format!(
                        "{} at position {} of {}",
                        chain_break.kind, chain_break.position, report.series
                    ),
                )
                .with_details(json!({
                    "series_key": report.series.series_key.as_str(),
                    "position": chain_break.position,
                    "record_id": chain_break.record_id,
                    "kind": chain_break.kind,
                    "expected_hash": chain_break.expected_hash,
                    "actual_hash": chain_break.actual_hash,
                })),
            )?;
        }

        Ok(())
    }
}
