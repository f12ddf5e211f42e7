use std::sync::Arc;

use chrono::Utc;

use super::{AuditError, AuditReceipt, AuditStore, Snapshot};
use crate::correlation::CorrelationContext;
use crate::logging::{LogEvent, Sink};
use crate::models::snapshot::{RequestSnapshot, ResponseSnapshot};

/// Sink that writes events, and optionally call snapshots, to an
/// [`AuditStore`].
///
/// When `capture_correlation` is set and an event is logged inside an open
/// call, the request is snapshotted; once the call has completed, the
/// response is. Each kind is stored at most once per correlation id.
pub struct AuditSink {
    store: Arc<dyn AuditStore>,
    capture_correlation: bool,
}

impl AuditSink {
    /// Wrap `store`, creating any missing tables.
    pub fn new(store: Arc<dyn AuditStore>, capture_correlation: bool) -> Result<Self, AuditError> {
        store.ensure_schema()?;
        Ok(Self {
            store,
            capture_correlation,
        })
    }

    pub fn captures_correlation(&self) -> bool {
        self.capture_correlation
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    /// Fallible form of [`Sink::emit`].
    pub fn write(
        &self,
        event: &LogEvent,
        context: Option<&CorrelationContext>,
    ) -> Result<AuditReceipt, AuditError> {
        let snapshot = match context {
            Some(context) if self.capture_correlation => Some(match context.response() {
                None => Snapshot::Request(RequestSnapshot::capture(context)),
                Some(response) => Snapshot::Response(ResponseSnapshot::capture(context, response)),
            }),
            _ => None,
        };

        self.store.record(event, snapshot.as_ref())
    }

    /// Delete stored events older than `age`. Failures are reported and
    /// otherwise ignored.
    pub fn prune_older_than(&self, age: chrono::Duration) -> usize {
        match self.store.prune_before(Utc::now() - age) {
            Ok(removed) => {
                if removed > 0 {
                    tracing::info!(
                        "Pruned {} audit events older than {} days",
                        removed,
                        age.num_days()
                    );
                }
                removed
            }
            Err(e) => {
                tracing::error!("Failed to prune audit events: {}", e);
                0
            }
        }
    }
}

impl Sink for AuditSink {
    fn emit(&self, event: &LogEvent, context: Option<&CorrelationContext>) {
        if let Err(e) = self.write(event, context) {
            tracing::error!(
                "Failed to write audit event from {} to {} store: {}",
                event.logger,
                self.store.name(),
                e
            );
        }
    }

    fn name(&self) -> &str {
        "db"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditStore;
    use crate::correlation::{InboundRequest, OutboundResponse};
    use crate::logging::Level;
    use crate::test_util::FailingAuditStore;
    use std::panic::Location;

    fn event(message: &str) -> LogEvent {
        LogEvent::capture("Requests", Level::Info, message.to_string(), Location::caller())
    }

    #[test]
    fn test_uncorrelated_event_has_no_snapshot() {
        let store = Arc::new(MemoryAuditStore::new());
        let sink = AuditSink::new(store.clone(), true).unwrap();

        let receipt = sink.write(&event("plain"), None).unwrap();

        assert!(!receipt.snapshot_written);
        assert_eq!(store.counts().unwrap().requests, 0);
    }

    #[test]
    fn test_open_call_snapshots_request_then_response() {
        let store = Arc::new(MemoryAuditStore::new());
        let sink = AuditSink::new(store.clone(), true).unwrap();
        let context = CorrelationContext::new(InboundRequest {
            method: "GET".to_string(),
            ..InboundRequest::default()
        });

        let received = sink.write(&event("received"), Some(&context)).unwrap();
        let again = sink.write(&event("working"), Some(&context)).unwrap();
        context.complete(OutboundResponse {
            status_code: 200,
            body: "{}".to_string(),
            ..OutboundResponse::default()
        });
        let completed = sink.write(&event("completed"), Some(&context)).unwrap();

        assert!(received.snapshot_written);
        assert!(!again.snapshot_written);
        assert!(completed.snapshot_written);

        let id = context.id().to_string();
        assert_eq!(store.request(&id).unwrap().method, "GET");
        assert_eq!(store.response(&id).unwrap().status, "200 OK");
        for log_id in [received.log_id, again.log_id, completed.log_id] {
            assert!(store.snapshots_for(log_id).unwrap().count() <= 1);
        }
    }

    #[test]
    fn test_capture_disabled_ignores_context() {
        let store = Arc::new(MemoryAuditStore::new());
        let sink = AuditSink::new(store.clone(), false).unwrap();
        let context = CorrelationContext::new(InboundRequest::default());

        sink.emit(&event("received"), Some(&context));

        let counts = store.counts().unwrap();
        assert_eq!(counts.events, 1);
        assert_eq!(counts.requests, 0);
    }

    #[test]
    fn test_emit_swallows_store_failures() {
        let sink = AuditSink::new(Arc::new(FailingAuditStore), true).unwrap();
        let context = CorrelationContext::new(InboundRequest::default());

        sink.emit(&event("lost"), Some(&context));
        assert!(sink.write(&event("lost"), None).is_err());
        assert_eq!(sink.prune_older_than(chrono::Duration::days(1)), 0);
    }
}
