//! Tax authority gateway boundary
//!
//! The scheduler talks to the authority only through [`GatewayAdapter`] and
//! asks [`ConnectionProvider`] whether credentials are currently usable.
//! Transport and certificate handling live behind these traits.

/// Scriptable in-process gateway for tests and demos
pub mod mock;

use crate::error::TransportError;
use async_trait::async_trait;
use invoice_ledger::{Environment, InvoiceRecord, TenantId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One transport attempt for a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRequest {
    /// Batch being submitted
    pub batch_id: u64,
    /// Unique per attempt, time-ordered
    pub attempt_id: Uuid,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Target endpoint
    pub environment: Environment,
    /// `hash_self` of every record in the payload
    pub idempotency_keys: Vec<String>,
    /// Records still awaiting an outcome
    pub records: Vec<InvoiceRecord>,
}

impl SubmissionRequest {
    /// Build a request; idempotency keys follow the record order
    pub fn new(
        batch_id: u64,
        tenant_id: TenantId,
        environment: Environment,
        records: Vec<InvoiceRecord>,
    ) -> Self {
        Self {
            batch_id,
            attempt_id: Uuid::now_v7(),
            tenant_id,
            environment,
            idempotency_keys: records.iter().map(|r| r.hash_self.clone()).collect(),
            records,
        }
    }
}

/// Business verdict for one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Accepted by the authority
    Accepted,
    /// Rejected; a corrective record is needed
    Rejected {
        /// Authority explanation
        reason: String,
    },
}

/// Per-record outcome echoed by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOutcome {
    /// `hash_self` of the record this outcome belongs to
    pub record_hash: String,
    /// Business verdict
    pub verdict: Verdict,
    /// Authority response code
    pub response_code: Option<String>,
    /// Outcome replayed from an earlier attempt, not a new fiscal submission
    pub already_processed: bool,
}

impl RecordOutcome {
    /// Accepted outcome
    pub fn accepted(record_hash: impl Into<String>) -> Self {
        Self {
            record_hash: record_hash.into(),
            verdict: Verdict::Accepted,
            response_code: None,
            already_processed: false,
        }
    }

    /// Rejected outcome
    pub fn rejected(record_hash: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            record_hash: record_hash.into(),
            verdict: Verdict::Rejected {
                reason: reason.into(),
            },
            response_code: None,
            already_processed: false,
        }
    }

    /// Attach a response code
    pub fn with_response_code(mut self, code: impl Into<String>) -> Self {
        self.response_code = Some(code.into());
        self
    }

    /// Whether the verdict is positive
    pub fn is_accepted(&self) -> bool {
        matches!(self.verdict, Verdict::Accepted)
    }
}

/// Gateway answer to a transport attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayResponse {
    /// Transport accepted the request
    pub transport_ok: bool,
    /// Outcomes keyed by record hash
    pub outcomes: Vec<RecordOutcome>,
}

/// Submits records to the tax authority.
///
/// Implementations must be idempotent per record hash: a hash seen before is
/// answered from the earlier outcome with `already_processed` set, never
/// submitted again.
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    /// Submit one attempt
    async fn submit(&self, request: &SubmissionRequest) -> Result<GatewayResponse, TransportError>;
}

/// Connection health as seen by the credential layer
pub trait ConnectionProvider: Send + Sync {
    /// Whether the gateway can be called right now
    fn is_usable(&self) -> bool;
}
