//! Persistent audit trail for log events.
//!
//! Provides the [`AuditStore`] trait and implementations:
//! - [`SqliteAuditStore`] - SQLite file (or `:memory:`) via rusqlite
//! - [`MemoryAuditStore`] - In-memory (testing)
//!
//! [`AuditSink`] plugs a store into the logging pipeline.

mod memory;
mod sink;
mod sqlite;

use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use memory::MemoryAuditStore;
pub use sink::AuditSink;
pub use sqlite::SqliteAuditStore;

use crate::config::{DbBackend, DbConfig};
use crate::logging::LogEvent;
use crate::models::snapshot::{RequestSnapshot, ResponseSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("IO error: {0}")]
    IoError(String),
}

/// Request or response metadata linked to one event.
#[derive(Debug, Clone)]
pub enum Snapshot {
    Request(RequestSnapshot),
    Response(ResponseSnapshot),
}

/// Outcome of a successful [`AuditStore::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditReceipt {
    /// Store-generated event id.
    pub log_id: i64,
    /// `false` when the snapshot was skipped because one of the same kind
    /// already exists for the correlation id.
    pub snapshot_written: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditCounts {
    pub events: usize,
    pub requests: usize,
    pub responses: usize,
}

/// Snapshots linked to one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkedSnapshots {
    /// Correlation id of the linked request snapshot.
    pub request: Option<String>,
    /// Row id of the linked response snapshot.
    pub response: Option<i64>,
}

impl LinkedSnapshots {
    pub fn count(&self) -> usize {
        usize::from(self.request.is_some()) + usize::from(self.response.is_some())
    }
}

/// Trait for audit store backends.
pub trait AuditStore: Send + Sync {
    /// Create any missing tables. Safe to call repeatedly.
    fn ensure_schema(&self) -> Result<(), AuditError>;

    /// Persist an event and, optionally, the snapshot linked to it, as
    /// one unit: either both are stored or neither is.
    fn record(&self, event: &LogEvent, snapshot: Option<&Snapshot>)
        -> Result<AuditReceipt, AuditError>;

    fn counts(&self) -> Result<AuditCounts, AuditError>;

    fn snapshots_for(&self, log_id: i64) -> Result<LinkedSnapshots, AuditError>;

    /// Delete events older than `cutoff` together with their snapshots.
    /// Returns the number of events removed.
    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, AuditError>;

    /// Name of this storage backend.
    fn name(&self) -> &str {
        "unknown"
    }
}

/// Open the backend selected by `logging.db.backend`.
pub fn open_store(db: &DbConfig) -> Result<Arc<dyn AuditStore>, AuditError> {
    match db.backend {
        DbBackend::Sqlite => Ok(Arc::new(SqliteAuditStore::open(&db.name)?)),
        DbBackend::Memory => Ok(Arc::new(MemoryAuditStore::new())),
    }
}
