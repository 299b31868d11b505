use super::{ConnectionProvider, GatewayAdapter, GatewayResponse, RecordOutcome, SubmissionRequest};
use crate::error::TransportError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Scriptable in-process gateway.
///
/// Accepts every record unless told otherwise and remembers each outcome by
/// record hash, so repeated submissions are answered as already processed.
#[derive(Debug, Default)]
pub struct MockGateway {
    latency: Duration,
    state: Mutex<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    rejections: HashMap<String, (String, Option<String>)>,
    processed: HashMap<String, RecordOutcome>,
    fiscal_submissions: HashMap<String, u32>,
    transport_failures: u32,
    lost_responses: u32,
    incomplete_responses: u32,
    calls: u32,
}

impl MockGateway {
    /// Gateway that accepts everything immediately
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Reject the record with this hash
    pub fn reject(&self, record_hash: impl Into<String>, reason: impl Into<String>, code: Option<&str>) {
        self.state.lock().rejections.insert(
            record_hash.into(),
            (reason.into(), code.map(str::to_string)),
        );
    }

    /// Fail the next `n` calls before anything is processed
    pub fn fail_transport(&self, n: u32) {
        self.state.lock().transport_failures = n;
    }

    /// Process the next `n` calls, then time out instead of answering
    pub fn lose_responses(&self, n: u32) {
        self.state.lock().lost_responses = n;
    }

    /// Answer the next `n` calls with no per-record outcomes
    pub fn omit_outcomes(&self, n: u32) {
        self.state.lock().incomplete_responses = n;
    }

    /// Times a record hash was really submitted (replays excluded)
    pub fn fiscal_submissions(&self, record_hash: &str) -> u32 {
        self.state
            .lock()
            .fiscal_submissions
            .get(record_hash)
            .copied()
            .unwrap_or(0)
    }

    /// Calls received, failed ones included
    pub fn calls(&self) -> u32 {
        self.state.lock().calls
    }
}

#[async_trait]
impl GatewayAdapter for MockGateway {
    async fn submit(&self, request: &SubmissionRequest) -> Result<GatewayResponse, TransportError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state.lock();
        state.calls += 1;

        if state.transport_failures > 0 {
            state.transport_failures -= 1;
            warn!(batch_id = request.batch_id, "Mock gateway: simulated transport failure");
            return Err(TransportError::Unreachable("simulated outage".to_string()));
        }

        let mut outcomes = Vec::with_capacity(request.records.len());
        for record in &request.records {
            let hash = &record.hash_self;
            if let Some(previous) = state.processed.get(hash) {
                outcomes.push(RecordOutcome {
                    already_processed: true,
                    ..previous.clone()
                });
                continue;
            }

            let outcome = match state.rejections.get(hash) {
                Some((reason, code)) => {
                    let outcome = RecordOutcome::rejected(hash.clone(), reason.clone());
                    match code {
                        Some(code) => outcome.with_response_code(code.clone()),
                        None => outcome,
                    }
                }
                None => RecordOutcome::accepted(hash.clone()),
            };
            *state.fiscal_submissions.entry(hash.clone()).or_insert(0) += 1;
            state.processed.insert(hash.clone(), outcome.clone());
            outcomes.push(outcome);
        }

        if state.lost_responses > 0 {
            state.lost_responses -= 1;
            warn!(batch_id = request.batch_id, "Mock gateway: processed, response lost");
            return Err(TransportError::Timeout(Duration::ZERO));
        }

        if state.incomplete_responses > 0 {
            state.incomplete_responses -= 1;
            outcomes.clear();
        }

        info!(
            batch_id = request.batch_id,
            records = request.records.len(),
            environment = %request.environment,
            "Mock gateway: batch processed"
        );

        Ok(GatewayResponse {
            transport_ok: true,
            outcomes,
        })
    }
}

/// Connection provider with a switchable health flag
#[derive(Debug)]
pub struct StaticConnection {
    usable: AtomicBool,
}

impl StaticConnection {
    /// Provider reporting `usable`
    pub fn new(usable: bool) -> Self {
        Self {
            usable: AtomicBool::new(usable),
        }
    }

    /// Flip the health flag
    pub fn set_usable(&self, usable: bool) {
        self.usable.store(usable, Ordering::SeqCst);
    }
}

impl Default for StaticConnection {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectionProvider for StaticConnection {
    fn is_usable(&self) -> bool {
        self.usable.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use invoice_ledger::types::RecordDraft;
    use invoice_ledger::{
        Environment, InvoiceFields, InvoiceKind, InvoiceRecord, RecordType, SeriesId, SeriesKey,
        TenantId,
    };
    use rust_decimal::Decimal;

    fn record(id: u64) -> InvoiceRecord {
        RecordDraft {
            series: SeriesId::new(TenantId::new("acme"), SeriesKey::new("B12345678")),
            fields: InvoiceFields {
                record_type: RecordType::Issuance,
                invoice_number: format!("VF-2026-{}", id),
                issue_date: NaiveDate::from_ymd_opt(2026, 5, 4).unwrap(),
                invoice_kind: InvoiceKind::F1,
                taxable_base: Decimal::new(10000, 2),
                tax_rate: Decimal::new(2100, 2),
                tax_amount: Decimal::new(2100, 2),
                total_amount: Decimal::new(12100, 2),
            },
            hash_version: invoice_ledger::types::HashVersion::CURRENT,
            hash_self: format!("{:064x}", id),
            hash_previous: String::new(),
            created_at: Utc::now(),
        }
        .into_record(id)
    }

    fn request(ids: &[u64]) -> SubmissionRequest {
        SubmissionRequest::new(
            7,
            TenantId::new("acme"),
            Environment::Staging,
            ids.iter().map(|id| record(*id)).collect(),
        )
    }

    #[tokio::test]
    async fn test_mock_accepts_by_default() {
        let gateway = MockGateway::new();
        let response = gateway.submit(&request(&[1, 2])).await.unwrap();

        assert!(response.transport_ok);
        assert_eq!(response.outcomes.len(), 2);
        assert!(response.outcomes.iter().all(|o| o.is_accepted()));
        assert!(response.outcomes.iter().all(|o| !o.already_processed));
    }

    #[tokio::test]
    async fn test_mock_rejects_scripted_hash() {
        let gateway = MockGateway::new();
        let req = request(&[1, 2]);
        gateway.reject(req.idempotency_keys[1].clone(), "NIF not registered", Some("4102"));

        let response = gateway.submit(&req).await.unwrap();
        assert!(response.outcomes[0].is_accepted());
        assert_eq!(
            response.outcomes[1].verdict,
            super::super::Verdict::Rejected {
                reason: "NIF not registered".to_string()
            }
        );
        assert_eq!(response.outcomes[1].response_code.as_deref(), Some("4102"));
    }

    #[tokio::test]
    async fn test_mock_replays_processed_hashes() {
        let gateway = MockGateway::new();
        gateway.lose_responses(1);
        let req = request(&[1]);

        assert!(matches!(
            gateway.submit(&req).await,
            Err(TransportError::Timeout(_))
        ));
        let response = gateway.submit(&req).await.unwrap();

        assert!(response.outcomes[0].already_processed);
        assert_eq!(gateway.fiscal_submissions(&req.idempotency_keys[0]), 1);
        assert_eq!(gateway.calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_transport_failure_processes_nothing() {
        let gateway = MockGateway::new();
        gateway.fail_transport(1);
        let req = request(&[1]);

        assert!(gateway.submit(&req).await.is_err());
        assert_eq!(gateway.fiscal_submissions(&req.idempotency_keys[0]), 0);
    }

    #[test]
    fn test_static_connection_toggle() {
        let connection = StaticConnection::default();
        assert!(connection.is_usable());
        connection.set_usable(false);
        assert!(!connection.is_usable());
    }
}
