//! Append-only audit sink.
//!
//! Recording never fails the caller: a sink that cannot persist an event logs
//! the failure and moves on.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::database::models::NewAuditLog;
use crate::database::repositories::AuditRepository;
use crate::database::time::now_ms;
use crate::domain::AuditEvent;
use crate::error::with_timeout;

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Sink that appends to the `audit_log` table.
pub struct DbAuditSink {
    repository: Arc<dyn AuditRepository>,
    timeout: Duration,
}

impl DbAuditSink {
    pub fn new(repository: Arc<dyn AuditRepository>, timeout: Duration) -> Self {
        Self {
            repository,
            timeout,
        }
    }
}

#[async_trait]
impl AuditSink for DbAuditSink {
    async fn record(&self, event: AuditEvent) {
        let entry = match NewAuditLog::from_event(&event, now_ms()) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(action = %event.action, error = %e, "Failed to encode audit event");
                return;
            }
        };

        if let Err(e) = with_timeout("audit insert", self.timeout, self.repository.insert(&entry)).await
        {
            warn!(
                action = %event.action,
                entity_id = %event.entity_id,
                error = %e,
                "Failed to record audit event"
            );
        }
    }
}

/// Sink that keeps events in memory.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}
