//! Metrics collection for observability
//!
//! Prometheus metrics on a private registry, so several ledgers (or tests)
//! can live in one process.
//!
//! # Metrics
//!
//! - `verifactu_records_appended_total` - Records appended
//! - `verifactu_append_conflicts_total` - Concurrency conflicts seen by appends
//! - `verifactu_append_duration_seconds` - Histogram of append latencies
//! - `verifactu_chain_verifications_total` - Verifications run
//! - `verifactu_chain_breaks_total` - Chain breaks detected
//! - `verifactu_batches_finished_total{outcome}` - Batches by terminal status
//! - `verifactu_transport_failures_total` - Gateway transport failures
//! - `verifactu_gateway_latency_seconds` - Histogram of gateway call latencies
//! - `verifactu_audit_write_failures_total{event_type}` - Audit events lost after
//!   the state change they describe was committed

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Records appended
    pub records_appended: IntCounter,

    /// Concurrency conflicts
    pub append_conflicts: IntCounter,

    /// Append duration histogram
    pub append_duration: Histogram,

    /// Verifications run
    pub verifications: IntCounter,

    /// Chain breaks detected
    pub chain_breaks: IntCounter,

    /// Batches by terminal outcome
    pub batches_finished: IntCounterVec,

    /// Transport failures
    pub transport_failures: IntCounter,

    /// Gateway latency histogram
    pub gateway_latency: Histogram,

    /// Audit events that could not be written
    pub audit_write_failures: IntCounterVec,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let records_appended = IntCounter::new(
            "verifactu_records_appended_total",
            "Total number of invoice records appended",
        )?;
        registry.register(Box::new(records_appended.clone()))?;

        let append_conflicts = IntCounter::new(
            "verifactu_append_conflicts_total",
            "Concurrency conflicts seen by appends",
        )?;
        registry.register(Box::new(append_conflicts.clone()))?;

        let append_duration = Histogram::with_opts(
            HistogramOpts::new(
                "verifactu_append_duration_seconds",
                "Histogram of append latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(append_duration.clone()))?;

        let verifications = IntCounter::new(
            "verifactu_chain_verifications_total",
            "Chain verifications run",
        )?;
        registry.register(Box::new(verifications.clone()))?;

        let chain_breaks = IntCounter::new(
            "verifactu_chain_breaks_total",
            "Chain breaks detected",
        )?;
        registry.register(Box::new(chain_breaks.clone()))?;

        let batches_finished = IntCounterVec::new(
            Opts::new(
                "verifactu_batches_finished_total",
                "Remision batches by terminal outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(batches_finished.clone()))?;

        let transport_failures = IntCounter::new(
            "verifactu_transport_failures_total",
            "Gateway transport failures",
        )?;
        registry.register(Box::new(transport_failures.clone()))?;

        let gateway_latency = Histogram::with_opts(
            HistogramOpts::new(
                "verifactu_gateway_latency_seconds",
                "Histogram of gateway call latencies",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;
        registry.register(Box::new(gateway_latency.clone()))?;

        let audit_write_failures = IntCounterVec::new(
            Opts::new(
                "verifactu_audit_write_failures_total",
                "Audit events lost after their state change was committed",
            ),
            &["event_type"],
        )?;
        registry.register(Box::new(audit_write_failures.clone()))?;

        Ok(Self {
            records_appended,
            append_conflicts,
            append_duration,
            verifications,
            chain_breaks,
            batches_finished,
            transport_failures,
            gateway_latency,
            audit_write_failures,
            registry,
        })
    }

    /// Record a successful append
    pub fn record_append(&self, duration_seconds: f64) {
        self.records_appended.inc();
        self.append_duration.observe(duration_seconds);
    }

    /// Record a concurrency conflict
    pub fn record_conflict(&self) {
        self.append_conflicts.inc();
    }

    /// Record a verification and the breaks it found
    pub fn record_verification(&self, breaks: usize) {
        self.verifications.inc();
        self.chain_breaks.inc_by(breaks as u64);
    }

    /// Record a batch reaching a terminal status
    pub fn record_batch_finished(&self, outcome: &str) {
        self.batches_finished.with_label_values(&[outcome]).inc();
    }

    /// Record a gateway call
    pub fn record_gateway_call(&self, duration_seconds: f64, transport_ok: bool) {
        self.gateway_latency.observe(duration_seconds);
        if !transport_ok {
            self.transport_failures.inc();
        }
    }

    /// Record an audit event that could not be written
    pub fn record_audit_failure(&self, event_type: &str) {
        self.audit_write_failures
            .with_label_values(&[event_type])
            .inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("records_appended", &self.records_appended.get())
            .field("chain_breaks", &self.chain_breaks.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.records_appended.get(), 0);
        assert_eq!(metrics.chain_breaks.get(), 0);

        // Private registries do not collide
        assert!(Metrics::new().is_ok());
    }

    #[test]
    fn test_record_append() {
        let metrics = Metrics::new().unwrap();
        metrics.record_append(0.002);
        metrics.record_append(0.003);
        assert_eq!(metrics.records_appended.get(), 2);
        assert_eq!(metrics.append_duration.get_sample_count(), 2);
    }

    #[test]
    fn test_record_verification() {
        let metrics = Metrics::new().unwrap();
        metrics.record_verification(0);
        metrics.record_verification(3);
        assert_eq!(metrics.verifications.get(), 2);
        assert_eq!(metrics.chain_breaks.get(), 3);
    }

    #[test]
    fn test_batch_outcomes() {
        let metrics = Metrics::new().unwrap();
        metrics.record_batch_finished("accepted");
        metrics.record_batch_finished("accepted");
        metrics.record_gateway_call(0.2, false);
        metrics.record_audit_failure("BATCH_RESULT");

        assert_eq!(
            metrics
                .batches_finished
                .with_label_values(&["accepted"])
                .get(),
            2
        );
        assert_eq!(metrics.transport_failures.get(), 1);
        assert_eq!(
            metrics
                .audit_write_failures
                .with_label_values(&["BATCH_RESULT"])
                .get(),
            1
        );
        assert_eq!(metrics.registry().gather().len(), 9);
    }
}
