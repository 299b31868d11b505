//! Core types for the invoice ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money)
//! - Closed enumerations for every status, so a new state is a compile error
//!   in every handler that matches on it

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tenant identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(String);

impl TenantId {
    /// Create new tenant ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Series key, derived from the issuer tax id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey(String);

impl SeriesKey {
    /// Create a series key from an already-normalised value
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive the series key from an issuer tax id (NIF).
    ///
    /// The tax id is trimmed and upper-cased; it must be 9 ASCII
    /// alphanumeric characters.
    pub fn for_issuer(tax_id: &str) -> crate::Result<Self> {
        let normalised = tax_id.trim().to_ascii_uppercase();
        if normalised.len() != 9 || !normalised.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(crate::Error::Validation(format!(
                "Issuer tax id '{}' must be 9 alphanumeric characters",
                tax_id
            )));
        }
        Ok(Self(normalised))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A chain partition: `(tenant_id, series_key)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesId {
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Series within the tenant
    pub series_key: SeriesKey,
}

impl SeriesId {
    /// Create new series ID
    pub fn new(tenant_id: TenantId, series_key: SeriesKey) -> Self {
        Self {
            tenant_id,
            series_key,
        }
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.series_key)
    }
}

/// Compose an invoice number as `SERIES-YEAR-NUMBER`
pub fn compose_invoice_number(series_prefix: &str, year: i32, number: u64) -> String {
    format!("{}-{}-{}", series_prefix, year, number)
}

/// Record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RecordType {
    /// New invoice (alta)
    Issuance = 1,
    /// Cancellation of a previously issued invoice (anulacion)
    Cancellation = 2,
}

impl RecordType {
    /// Stable code used by the canonical encoding
    pub fn code(&self) -> &'static str {
        match self {
            RecordType::Issuance => "issuance",
            RecordType::Cancellation => "cancellation",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Invoice kind (TipoFactura)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum InvoiceKind {
    /// Complete invoice
    F1,
    /// Simplified invoice
    F2,
    /// Invoice issued in substitution of simplified invoices
    F3,
    /// Corrective: legal error and art. 80 (1, 2, 6)
    R1,
    /// Corrective: art. 80.3
    R2,
    /// Corrective: art. 80.4
    R3,
    /// Corrective: other causes
    R4,
    /// Corrective of simplified invoices
    R5,
}

impl InvoiceKind {
    /// Code
    pub fn code(&self) -> &'static str {
        match self {
            InvoiceKind::F1 => "F1",
            InvoiceKind::F2 => "F2",
            InvoiceKind::F3 => "F3",
            InvoiceKind::R1 => "R1",
            InvoiceKind::R2 => "R2",
            InvoiceKind::R3 => "R3",
            InvoiceKind::R4 => "R4",
            InvoiceKind::R5 => "R5",
        }
    }

    /// Parse from string
    pub fn from_code(s: &str) -> Option<Self> {
        match s {
            "F1" => Some(InvoiceKind::F1),
            "F2" => Some(InvoiceKind::F2),
            "F3" => Some(InvoiceKind::F3),
            "R1" => Some(InvoiceKind::R1),
            "R2" => Some(InvoiceKind::R2),
            "R3" => Some(InvoiceKind::R3),
            "R4" => Some(InvoiceKind::R4),
            "R5" => Some(InvoiceKind::R5),
            _ => None,
        }
    }

    /// Corrective invoices (rectificativas)
    pub fn is_corrective(&self) -> bool {
        matches!(
            self,
            InvoiceKind::R1 | InvoiceKind::R2 | InvoiceKind::R3 | InvoiceKind::R4 | InvoiceKind::R5
        )
    }
}

impl fmt::Display for InvoiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Business fields of an invoice record.
///
/// These are the hashed fields: once a record is appended none of them may
/// change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceFields {
    /// Issuance or cancellation
    pub record_type: RecordType,
    /// Full invoice number, e.g. `VF-2026-42`
    pub invoice_number: String,
    /// Issue date
    pub issue_date: NaiveDate,
    /// Invoice kind
    pub invoice_kind: InvoiceKind,
    /// Taxable base
    pub taxable_base: Decimal,
    /// Tax rate in percent
    pub tax_rate: Decimal,
    /// Tax amount
    pub tax_amount: Decimal,
    /// Total amount
    pub total_amount: Decimal,
}

/// Maximum invoice number length accepted by the authority
pub const MAX_INVOICE_NUMBER_LEN: usize = 60;

impl InvoiceFields {
    /// Check field-level invariants.
    ///
    /// Runs before any hash is computed.
    pub fn validate(&self) -> crate::Result<()> {
        let invoice_number = self.invoice_number.as_str();
        if invoice_number.trim().is_empty() {
            return Err(crate::Error::Validation(
                "Invoice number is required".to_string(),
            ));
        }
        if invoice_number.trim() != invoice_number {
            return Err(crate::Error::Validation(format!(
                "Invoice number {:?} has leading or trailing whitespace",
                invoice_number
            )));
        }
        if invoice_number.len() > MAX_INVOICE_NUMBER_LEN {
            return Err(crate::Error::Validation(format!(
                "Invoice number exceeds {} characters",
                MAX_INVOICE_NUMBER_LEN
            )));
        }

        for (name, amount) in [
            ("Taxable base", self.taxable_base),
            ("Tax rate", self.tax_rate),
            ("Tax amount", self.tax_amount),
            ("Total amount", self.total_amount),
        ] {
            if amount.normalize().scale() > 2 {
                return Err(crate::Error::Validation(format!(
                    "{} {} has more than two decimals",
                    name, amount
                )));
            }
        }

        if self.total_amount <= Decimal::ZERO {
            return Err(crate::Error::Validation(
                "Total amount must be positive".to_string(),
            ));
        }
        if self.taxable_base < Decimal::ZERO {
            return Err(crate::Error::Validation(
                "Taxable base must not be negative".to_string(),
            ));
        }
        if self.tax_amount < Decimal::ZERO {
            return Err(crate::Error::Validation(
                "Tax amount must not be negative".to_string(),
            ));
        }
        if self.tax_rate < Decimal::ZERO || self.tax_rate > Decimal::ONE_HUNDRED {
            return Err(crate::Error::Validation(
                "Tax rate must be between 0 and 100".to_string(),
            ));
        }

        // One cent of rounding slack between base + tax and total
        let drift = (self.taxable_base + self.tax_amount - self.total_amount).abs();
        if drift > Decimal::new(1, 2) {
            return Err(crate::Error::Validation(format!(
                "Taxable base {} plus tax {} does not match total {}",
                self.taxable_base, self.tax_amount, self.total_amount
            )));
        }

        Ok(())
    }
}

/// Hash format version stored with every record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum HashVersion {
    /// SHA-256 over the `v1` canonical string
    V1 = 1,
}

impl HashVersion {
    /// Version used for new appends
    pub const CURRENT: HashVersion = HashVersion::V1;
}

/// Transmission status of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SubmissionStatus {
    /// Not yet sent
    Pending = 1,
    /// Transport accepted, awaiting business outcome
    Submitted = 2,
    /// Accepted by the authority (terminal)
    Accepted = 3,
    /// Rejected by the authority (terminal)
    Rejected = 4,
    /// Could not be transmitted (terminal)
    Error = 5,
}

impl SubmissionStatus {
    /// Terminal statuses are never overwritten
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionStatus::Accepted | SubmissionStatus::Rejected | SubmissionStatus::Error
        )
    }

    /// Allowed forward transitions
    pub fn can_transition_to(&self, next: SubmissionStatus) -> bool {
        match (self, next) {
            (SubmissionStatus::Pending, SubmissionStatus::Submitted) => true,
            (SubmissionStatus::Pending, SubmissionStatus::Error) => true,
            (SubmissionStatus::Submitted, SubmissionStatus::Accepted) => true,
            (SubmissionStatus::Submitted, SubmissionStatus::Rejected) => true,
            (SubmissionStatus::Submitted, SubmissionStatus::Error) => true,
            _ => false,
        }
    }

    /// Status name
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::Accepted => "accepted",
            SubmissionStatus::Rejected => "rejected",
            SubmissionStatus::Error => "error",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry in the tamper-evident chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    /// Ledger-assigned, monotonically increasing, never reused
    pub id: u64,

    /// Owning tenant
    pub tenant_id: TenantId,

    /// Series within the tenant
    pub series_key: SeriesKey,

    /// Hashed business fields
    pub fields: InvoiceFields,

    /// Canonical encoding version used for `hash_self`
    pub hash_version: HashVersion,

    /// Hex digest of this record
    pub hash_self: String,

    /// Hex digest of the previous record in the series, empty for genesis
    pub hash_previous: String,

    /// Transmission status
    pub submission_status: SubmissionStatus,

    /// Authority rejection reason
    pub rejection_reason: Option<String>,

    /// Authority response code
    pub response_code: Option<String>,

    /// Remision batch this record was assigned to
    pub remision_batch_id: Option<u64>,

    /// Assignment time (informational, never used for ordering)
    pub created_at: DateTime<Utc>,
}

impl InvoiceRecord {
    /// Series this record belongs to
    pub fn series_id(&self) -> SeriesId {
        SeriesId::new(self.tenant_id.clone(), self.series_key.clone())
    }

    /// Genesis record of its series
    pub fn is_genesis(&self) -> bool {
        self.hash_previous.is_empty()
    }

    /// Recompute `hash_self` from the stored fields and stored `hash_previous`
    pub fn recompute_hash(&self) -> String {
        crate::crypto::record_hash(
            self.hash_version,
            &self.tenant_id,
            &self.series_key,
            &self.fields,
            &self.hash_previous,
        )
    }
}

/// A record ready to be persisted; the store assigns the id
#[derive(Debug, Clone)]
pub struct RecordDraft {
    /// Target series
    pub series: SeriesId,
    /// Business fields
    pub fields: InvoiceFields,
    /// Hash version
    pub hash_version: HashVersion,
    /// Computed hash
    pub hash_self: String,
    /// Previous tip hash
    pub hash_previous: String,
    /// Assignment time
    pub created_at: DateTime<Utc>,
}

impl RecordDraft {
    /// Materialise the record with its assigned id
    pub fn into_record(self, id: u64) -> InvoiceRecord {
        InvoiceRecord {
            id,
            tenant_id: self.series.tenant_id,
            series_key: self.series.series_key,
            fields: self.fields,
            hash_version: self.hash_version,
            hash_self: self.hash_self,
            hash_previous: self.hash_previous,
            submission_status: SubmissionStatus::Pending,
            rejection_reason: None,
            response_code: None,
            remision_batch_id: None,
            created_at: self.created_at,
        }
    }
}

/// Update of the transmission fields of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionUpdate {
    /// New status
    pub status: SubmissionStatus,
    /// Rejection or error reason
    pub reason: Option<String>,
    /// Authority response code
    pub response_code: Option<String>,
}

impl SubmissionUpdate {
    /// Status-only update
    pub fn status(status: SubmissionStatus) -> Self {
        Self {
            status,
            reason: None,
            response_code: None,
        }
    }
}

/// Write block placed on a series after an integrity break
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesBlock {
    /// Why writes are refused
    pub reason: String,
    /// Number of breaks found by the verification that placed the block
    pub break_count: u32,
    /// When the block was placed
    pub blocked_at: DateTime<Utc>,
}

/// Summary of the last verification of a series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSummary {
    /// Records scanned
    pub total_records: u64,
    /// Breaks found
    pub breaks_found: u32,
    /// Tip hash at verification time
    pub tip_hash: Option<String>,
    /// When the verification ran
    pub verified_at: DateTime<Utc>,
}

impl VerificationSummary {
    /// No breaks found
    pub fn is_intact(&self) -> bool {
        self.breaks_found == 0
    }
}

/// Chain status exposed to API layers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStatus {
    /// Series
    pub series: SeriesId,
    /// Records in the series
    pub total_records: u64,
    /// Current tip hash
    pub tip_hash: Option<String>,
    /// Active write block, if any
    pub block: Option<SeriesBlock>,
    /// Last verification result
    pub last_verification: Option<VerificationSummary>,
}

/// Authority environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Test endpoint
    Staging,
    /// Live endpoint
    Production,
}

impl Environment {
    /// Name
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Staging
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Remision batch status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BatchStatus {
    /// Created, membership frozen, waiting for a claimant
    Queued = 1,
    /// Claimed by exactly one worker
    Processing = 2,
    /// Transport accepted the request
    Submitted = 3,
    /// Every record accepted (terminal)
    Accepted = 4,
    /// Mixed or all-rejected outcomes (terminal)
    PartiallyRejected = 5,
    /// Transport failure, waiting for a retry sweep
    Failed = 6,
    /// Retry ceiling exceeded (terminal)
    FailedTerminal = 7,
    /// Cancelled while queued (terminal)
    Cancelled = 8,
}

impl BatchStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [BatchStatus; 8] = [
        BatchStatus::Queued,
        BatchStatus::Processing,
        BatchStatus::Submitted,
        BatchStatus::Accepted,
        BatchStatus::PartiallyRejected,
        BatchStatus::Failed,
        BatchStatus::FailedTerminal,
        BatchStatus::Cancelled,
    ];

    /// Terminal statuses
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Accepted
                | BatchStatus::PartiallyRejected
                | BatchStatus::FailedTerminal
                | BatchStatus::Cancelled
        )
    }

    /// State machine edges
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        match (self, next) {
            (BatchStatus::Queued, BatchStatus::Processing) => true,
            (BatchStatus::Queued, BatchStatus::Cancelled) => true,
            (BatchStatus::Processing, BatchStatus::Submitted) => true,
            (BatchStatus::Processing, BatchStatus::Failed) => true,
            (BatchStatus::Processing, BatchStatus::FailedTerminal) => true,
            (BatchStatus::Submitted, BatchStatus::Accepted) => true,
            (BatchStatus::Submitted, BatchStatus::PartiallyRejected) => true,
            (BatchStatus::Failed, BatchStatus::Queued) => true,
            // Manual retry of a batch that ran out of attempts
            (BatchStatus::FailedTerminal, BatchStatus::Queued) => true,
            _ => false,
        }
    }

    /// Status name
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Queued => "queued",
            BatchStatus::Processing => "processing",
            BatchStatus::Submitted => "submitted",
            BatchStatus::Accepted => "accepted",
            BatchStatus::PartiallyRejected => "partially_rejected",
            BatchStatus::Failed => "failed",
            BatchStatus::FailedTerminal => "failed_terminal",
            BatchStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of submission work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemisionBatch {
    /// Store-assigned ID
    pub id: u64,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Target environment
    pub environment: Environment,
    /// Current status
    pub status: BatchStatus,
    /// Member record IDs, frozen at creation
    pub record_ids: Vec<u64>,
    /// Number of members
    pub total_records: u32,
    /// Members accepted by the authority
    pub accepted_records: u32,
    /// Members rejected by the authority
    pub rejected_records: u32,
    /// Transport attempts made so far
    pub attempts: u32,
    /// Earliest time a failed batch may be re-queued
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Last transport error
    pub last_error: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Batch creation request
#[derive(Debug, Clone)]
pub struct NewBatch {
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Target environment
    pub environment: Environment,
    /// Members, ascending by ID
    pub record_ids: Vec<u64>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Audit event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    /// Chain verification ran
    ChainVerify,
    /// A chain break was found
    ChainBreakDetected,
    /// Operator cleared a series write block
    ChainIncidentResolved,
    /// Batch entered processing
    BatchSubmit,
    /// Batch reached a terminal state
    BatchResult,
    /// Batch failed transport and was scheduled for retry
    BatchRetryScheduled,
    /// Record appended
    RecordCreate,
    /// Cancellation record appended
    RecordCancel,
    /// Write-back found a record already in a terminal status
    RecordStatusAnomaly,
}

impl AuditEventType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::ChainVerify => "CHAIN_VERIFY",
            AuditEventType::ChainBreakDetected => "CHAIN_BREAK_DETECTED",
            AuditEventType::ChainIncidentResolved => "CHAIN_INCIDENT_RESOLVED",
            AuditEventType::BatchSubmit => "BATCH_SUBMIT",
            AuditEventType::BatchResult => "BATCH_RESULT",
            AuditEventType::BatchRetryScheduled => "BATCH_RETRY_SCHEDULED",
            AuditEventType::RecordCreate => "RECORD_CREATE",
            AuditEventType::RecordCancel => "RECORD_CANCEL",
            AuditEventType::RecordStatusAnomaly => "RECORD_STATUS_ANOMALY",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Audit severity level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    /// Normal operation
    Info,
    /// Needs attention
    Warning,
    /// Failed operation
    Error,
    /// Integrity incident
    Critical,
}

/// Immutable audit event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Store-assigned ID
    pub id: u64,
    /// Tenant
    pub tenant_id: TenantId,
    /// Event type
    pub event_type: AuditEventType,
    /// Severity
    pub severity: AuditSeverity,
    /// Human-readable message
    pub message: String,
    /// Structured payload
    pub details: serde_json::Value,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Audit event before the store assigns its ID and timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEvent {
    /// Tenant
    pub tenant_id: TenantId,
    /// Event type
    pub event_type: AuditEventType,
    /// Severity
    pub severity: AuditSeverity,
    /// Message
    pub message: String,
    /// Structured payload
    pub details: serde_json::Value,
}

impl NewAuditEvent {
    /// Create new audit event
    pub fn new(
        tenant_id: TenantId,
        event_type: AuditEventType,
        severity: AuditSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            event_type,
            severity,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    /// Attach a structured payload
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Audit query filter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditFilter {
    /// Only this event type
    pub event_type: Option<AuditEventType>,
    /// At least this severity
    pub min_severity: Option<AuditSeverity>,
    /// Created at or after
    pub since: Option<DateTime<Utc>>,
    /// Created at or before
    pub until: Option<DateTime<Utc>>,
}

impl AuditFilter {
    /// Filter on event type
    pub fn event_type(event_type: AuditEventType) -> Self {
        Self {
            event_type: Some(event_type),
            ..Self::default()
        }
    }

    /// Check a single event
    pub fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(event_type) = self.event_type {
            if event.event_type != event_type {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if event.severity < min {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.created_at > until {
                return false;
            }
        }
        true
    }
}

/// Position in the audit log, ordered by `(created_at, id)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AuditCursor {
    /// Creation time in nanoseconds
    pub created_at_nanos: i64,
    /// Event ID
    pub id: u64,
}

impl AuditCursor {
    /// Cursor pointing at an event
    pub fn of(event: &AuditEvent) -> Self {
        Self {
            created_at_nanos: event.created_at.timestamp_nanos_opt().unwrap_or(0),
            id: event.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> InvoiceFields {
        InvoiceFields {
            record_type: RecordType::Issuance,
            invoice_number: "VF-2026-1".to_string(),
            issue_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            invoice_kind: InvoiceKind::F1,
            taxable_base: Decimal::new(10000, 2),
            tax_rate: Decimal::new(2100, 2),
            tax_amount: Decimal::new(2100, 2),
            total_amount: Decimal::new(12100, 2),
        }
    }

    #[test]
    fn test_series_key_for_issuer() {
        let key = SeriesKey::for_issuer(" b12345678 ").unwrap();
        assert_eq!(key.as_str(), "B12345678");

        assert!(SeriesKey::for_issuer("B1234").is_err());
        assert!(SeriesKey::for_issuer("B1234567-").is_err());
    }

    #[test]
    fn test_compose_invoice_number() {
        assert_eq!(compose_invoice_number("VF", 2026, 42), "VF-2026-42");
    }

    #[test]
    fn test_invoice_kind_codes() {
        assert_eq!(InvoiceKind::from_code("R1"), Some(InvoiceKind::R1));
        assert_eq!(InvoiceKind::from_code("X9"), None);
        assert!(InvoiceKind::R3.is_corrective());
        assert!(!InvoiceKind::F2.is_corrective());
    }

    #[test]
    fn test_fields_validation() {
        assert!(fields().validate().is_ok());

        let mut zero_total = fields();
        zero_total.total_amount = Decimal::ZERO;
        let err = zero_total.validate().unwrap_err();
        assert!(err.to_string().contains("positive"));

        let mut empty_number = fields();
        empty_number.invoice_number = "  ".to_string();
        assert!(empty_number.validate().is_err());

        let mut mismatch = fields();
        mismatch.tax_amount = Decimal::new(3000, 2);
        assert!(mismatch.validate().is_err());

        let mut rate = fields();
        rate.tax_rate = Decimal::new(101, 0);
        assert!(rate.validate().is_err());
    }

    #[test]
    fn test_fields_validation_rejects_values_outside_hash_precision() {
        let mut sub_cent = fields();
        sub_cent.total_amount = Decimal::new(121004, 3);
        sub_cent.tax_amount = Decimal::new(21004, 3);
        let err = sub_cent.validate().unwrap_err();
        assert!(err.to_string().contains("more than two decimals"));

        // Trailing zeros are not extra precision
        let mut padded_scale = fields();
        padded_scale.total_amount = Decimal::new(121000, 3);
        assert!(padded_scale.validate().is_ok());

        let mut padded_number = fields();
        padded_number.invoice_number = " VF-2026-1".to_string();
        assert!(padded_number.validate().is_err());
        padded_number.invoice_number = "VF-2026-1\t".to_string();
        assert!(padded_number.validate().is_err());
    }

    #[test]
    fn test_submission_transitions() {
        use SubmissionStatus::*;
        assert!(Pending.can_transition_to(Submitted));
        assert!(Submitted.can_transition_to(Accepted));
        assert!(Submitted.can_transition_to(Rejected));
        assert!(!Accepted.can_transition_to(Rejected));
        assert!(!Rejected.can_transition_to(Accepted));
        assert!(!Submitted.can_transition_to(Pending));
        assert!(Accepted.is_terminal());
        assert!(!Submitted.is_terminal());
    }

    #[test]
    fn test_batch_transitions() {
        use BatchStatus::*;
        assert!(Queued.can_transition_to(Processing));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(!Processing.can_transition_to(Cancelled));
        assert!(!Submitted.can_transition_to(Cancelled));
        assert!(Failed.can_transition_to(Queued));
        assert!(!Accepted.can_transition_to(Queued));
        assert!(PartiallyRejected.is_terminal());
        assert!(!Failed.is_terminal());
    }

    #[test]
    fn test_audit_filter() {
        let event = AuditEvent {
            id: 1,
            tenant_id: TenantId::new("t1"),
            event_type: AuditEventType::ChainVerify,
            severity: AuditSeverity::Warning,
            message: "verify".to_string(),
            details: serde_json::Value::Null,
            created_at: Utc::now(),
        };

        assert!(AuditFilter::default().matches(&event));
        assert!(AuditFilter::event_type(AuditEventType::ChainVerify).matches(&event));
        assert!(!AuditFilter::event_type(AuditEventType::BatchResult).matches(&event));

        let severe = AuditFilter {
            min_severity: Some(AuditSeverity::Error),
            ..AuditFilter::default()
        };
        assert!(!severe.matches(&event));
    }
}
