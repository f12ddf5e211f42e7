//! Shared fixtures for unit and integration tests.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

use crate::audit::{AuditCounts, AuditError, AuditReceipt, AuditStore, LinkedSnapshots, Snapshot};
use crate::config::{ApiConfig, Config, LoggingConfig, OwnerConfig, ServerConfig};
use crate::correlation::CorrelationContext;
use crate::logging::{LogEvent, Sink};

pub const TEST_API_KEY: &str = "test-secret-key";

/// Config with no built-in sinks, pointed at `api_base`.
pub fn test_config(api_base: &str) -> Config {
    Config {
        server: ServerConfig {
            owner: OwnerConfig {
                name: "Test Owner".to_string(),
                email: "owner@example.com".to_string(),
            },
            ..ServerConfig::default()
        },
        logging: LoggingConfig {
            handlers: vec![],
            ..LoggingConfig::default()
        },
        api: ApiConfig {
            base: api_base.to_string(),
            key: TEST_API_KEY.to_string(),
            cache_expiry: 60,
        },
    }
}

/// Sink that keeps every event in memory.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(LogEvent, Option<uuid::Uuid>)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(event, _)| event.message.clone())
            .collect()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(event, _)| event.clone())
            .collect()
    }

    /// Correlation ids seen, `None` for uncorrelated events.
    pub fn correlation_ids(&self) -> Vec<Option<uuid::Uuid>> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, id)| *id)
            .collect()
    }
}

impl Sink for RecordingSink {
    fn emit(&self, event: &LogEvent, context: Option<&CorrelationContext>) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event.clone(), context.map(CorrelationContext::id)));
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Store whose schema check succeeds and every other call fails.
pub struct FailingAuditStore;

impl FailingAuditStore {
    fn fail<T>() -> Result<T, AuditError> {
        Err(AuditError::DatabaseError("database is locked".to_string()))
    }
}

impl AuditStore for FailingAuditStore {
    fn ensure_schema(&self) -> Result<(), AuditError> {
        Ok(())
    }

    fn record(&self, _event: &LogEvent, _snapshot: Option<&Snapshot>) -> Result<AuditReceipt, AuditError> {
        Self::fail()
    }

    fn counts(&self) -> Result<AuditCounts, AuditError> {
        Self::fail()
    }

    fn snapshots_for(&self, _log_id: i64) -> Result<LinkedSnapshots, AuditError> {
        Self::fail()
    }

    fn prune_before(&self, _cutoff: DateTime<Utc>) -> Result<usize, AuditError> {
        Self::fail()
    }

    fn name(&self) -> &str {
        "failing"
    }
}
