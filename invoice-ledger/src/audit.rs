//! Audit event log
//!
//! Append and query are the only operations. Queries are lazy: events are
//! fetched a page at a time, in `(created_at, id)` order, and a query can be
//! resumed from any event it has yielded.

use crate::clock::Clock;
use crate::config::AuditConfig;
use crate::storage::AuditStore;
use crate::types::{AuditCursor, AuditEvent, AuditFilter, AuditSeverity, NewAuditEvent, TenantId};
use crate::Result;
use std::collections::VecDeque;
use std::sync::Arc;

/// Append-only audit log
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    page_size: usize,
}

impl AuditLog {
    /// Create an audit log over a store
    pub fn new(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>, config: &AuditConfig) -> Self {
        Self {
            store,
            clock,
            page_size: config.page_size.max(1),
        }
    }

    /// Append an event, stamped with the injected clock
    pub fn append(&self, event: NewAuditEvent) -> Result<AuditEvent> {
        let stored = self.store.append_event(event, self.clock.now())?;

        match stored.severity {
            AuditSeverity::Info => tracing::debug!(
                tenant_id = %stored.tenant_id,
                event_type = %stored.event_type,
                event_id = stored.id,
                "{}",
                stored.message
            ),
            AuditSeverity::Warning => tracing::warn!(
                tenant_id = %stored.tenant_id,
                event_type = %stored.event_type,
                event_id = stored.id,
                "{}",
                stored.message
            ),
            AuditSeverity::Error | AuditSeverity::Critical => tracing::error!(
                tenant_id = %stored.tenant_id,
                event_type = %stored.event_type,
                event_id = stored.id,
                severity = ?stored.severity,
                "{}",
                stored.message
            ),
        }

        Ok(stored)
    }

    /// Lazy, paged query over a tenant's events
    pub fn query(&self, tenant_id: &TenantId, filter: AuditFilter) -> AuditQuery {
        AuditQuery {
            store: Arc::clone(&self.store),
            tenant_id: tenant_id.clone(),
            filter,
            page_size: self.page_size,
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }
}

/// Lazy sequence of audit events
///
/// Yields `Err` at most once per failed page fetch; the next call retries the
/// same page.
#[derive(Clone)]
pub struct AuditQuery {
    store: Arc<dyn AuditStore>,
    tenant_id: TenantId,
    filter: AuditFilter,
    page_size: usize,
    cursor: Option<AuditCursor>,
    buffer: VecDeque<AuditEvent>,
    exhausted: bool,
}

impl AuditQuery {
    /// Position after the last yielded event
    pub fn cursor(&self) -> Option<AuditCursor> {
        self.cursor
    }

    /// Continue after `cursor` instead of the current position
    pub fn resume_after(mut self, cursor: Option<AuditCursor>) -> Self {
        self.cursor = cursor;
        self.buffer.clear();
        self.exhausted = false;
        self
    }

    /// Start over from the first event
    pub fn restart(&mut self) {
        self.cursor = None;
        self.buffer.clear();
        self.exhausted = false;
    }

    fn fill(&mut self) -> Result<()> {
        let page =
            self.store
                .page_events(&self.tenant_id, &self.filter, self.cursor, self.page_size)?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl Iterator for AuditQuery {
    type Item = Result<AuditEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                return Some(Err(e));
            }
        }

        let event = self.buffer.pop_front()?;
        self.cursor = Some(AuditCursor::of(&event));
        Some(Ok(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;
    use crate::types::AuditEventType;
    use chrono::{Duration, Utc};

    fn log(page_size: usize) -> (AuditLog, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let log = AuditLog::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            &AuditConfig { page_size },
        );
        (log, clock)
    }

    fn event(tenant: &str, event_type: AuditEventType, message: &str) -> NewAuditEvent {
        NewAuditEvent::new(TenantId::new(tenant), event_type, AuditSeverity::Info, message)
    }

    #[test]
    fn test_query_pages_in_order() {
        let (log, clock) = log(2);
        for i in 0..5 {
            log.append(event("t1", AuditEventType::BatchSubmit, &format!("e{}", i)))
                .unwrap();
            clock.advance(Duration::seconds(1));
        }

        let messages: Vec<String> = log
            .query(&TenantId::new("t1"), AuditFilter::default())
            .map(|e| e.unwrap().message)
            .collect();
        assert_eq!(messages, vec!["e0", "e1", "e2", "e3", "e4"]);
    }

    #[test]
    fn test_query_is_restartable() {
        let (log, _clock) = log(2);
        for i in 0..3 {
            log.append(event("t1", AuditEventType::BatchSubmit, &format!("e{}", i)))
                .unwrap();
        }
        let tenant = TenantId::new("t1");

        let mut query = log.query(&tenant, AuditFilter::default());
        assert_eq!(query.next().unwrap().unwrap().message, "e0");
        let cursor = query.cursor();

        let resumed: Vec<String> = log
            .query(&tenant, AuditFilter::default())
            .resume_after(cursor)
            .map(|e| e.unwrap().message)
            .collect();
        assert_eq!(resumed, vec!["e1", "e2"]);

        query.restart();
        assert_eq!(query.count(), 3);
    }

    #[test]
    fn test_query_filters_and_tenant_isolation() {
        let (log, _clock) = log(10);
        log.append(event("t1", AuditEventType::ChainVerify, "verify")).unwrap();
        log.append(event("t1", AuditEventType::BatchResult, "result")).unwrap();
        log.append(event("t2", AuditEventType::ChainVerify, "other")).unwrap();

        let verifies: Vec<AuditEvent> = log
            .query(
                &TenantId::new("t1"),
                AuditFilter::event_type(AuditEventType::ChainVerify),
            )
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(verifies.len(), 1);
        assert_eq!(verifies[0].message, "verify");
    }

    #[test]
    fn test_events_appended_later_are_seen() {
        let (log, _clock) = log(2);
        let tenant = TenantId::new("t1");
        log.append(event("t1", AuditEventType::BatchSubmit, "first")).unwrap();

        let mut query = log.query(&tenant, AuditFilter::default());
        assert!(query.next().is_some());
        assert!(query.next().is_none());

        log.append(event("t1", AuditEventType::BatchSubmit, "second")).unwrap();
        let more: Vec<_> = log
            .query(&tenant, AuditFilter::default())
            .resume_after(query.cursor())
            .collect();
        assert_eq!(more.len(), 1);
    }
}
