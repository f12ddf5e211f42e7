use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

use super::{AuditCounts, AuditError, AuditReceipt, AuditStore, LinkedSnapshots, Snapshot};
use crate::logging::LogEvent;
use crate::models::snapshot::{RequestSnapshot, ResponseSnapshot};

/// In-memory audit store for testing.
#[derive(Default)]
pub struct MemoryAuditStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    events: Vec<(i64, LogEvent)>,
    /// Keyed by correlation id.
    requests: HashMap<String, (i64, RequestSnapshot)>,
    responses: HashMap<String, (i64, ResponseSnapshot)>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages of all stored events, oldest first.
    pub fn messages(&self) -> Vec<String> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.events.iter().map(|(_, e)| e.message.clone()).collect()
    }

    pub fn request(&self, correlation_id: &str) -> Option<RequestSnapshot> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.requests.get(correlation_id).map(|(_, s)| s.clone())
    }

    pub fn response(&self, correlation_id: &str) -> Option<ResponseSnapshot> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.responses.get(correlation_id).map(|(_, s)| s.clone())
    }
}

impl AuditStore for MemoryAuditStore {
    fn ensure_schema(&self) -> Result<(), AuditError> {
        Ok(())
    }

    fn record(
        &self,
        event: &LogEvent,
        snapshot: Option<&Snapshot>,
    ) -> Result<AuditReceipt, AuditError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.next_id += 1;
        let log_id = state.next_id;
        state.events.push((log_id, event.clone()));

        let snapshot_written = match snapshot {
            None => false,
            Some(Snapshot::Request(request)) => {
                if state.requests.contains_key(&request.correlation_id) {
                    false
                } else {
                    state
                        .requests
                        .insert(request.correlation_id.clone(), (log_id, request.clone()));
                    true
                }
            }
            Some(Snapshot::Response(response)) => {
                if state.responses.contains_key(&response.correlation_id) {
                    false
                } else {
                    state
                        .responses
                        .insert(response.correlation_id.clone(), (log_id, response.clone()));
                    true
                }
            }
        };

        Ok(AuditReceipt {
            log_id,
            snapshot_written,
        })
    }

    fn counts(&self) -> Result<AuditCounts, AuditError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(AuditCounts {
            events: state.events.len(),
            requests: state.requests.len(),
            responses: state.responses.len(),
        })
    }

    fn snapshots_for(&self, log_id: i64) -> Result<LinkedSnapshots, AuditError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(LinkedSnapshots {
            request: state
                .requests
                .iter()
                .find(|(_, (id, _))| *id == log_id)
                .map(|(key, _)| key.clone()),
            // Row ids are shared with events here.
            response: state
                .responses
                .values()
                .find(|(id, _)| *id == log_id)
                .map(|(id, _)| *id),
        })
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, AuditError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let before = state.events.len();
        let expired: Vec<i64> = state
            .events
            .iter()
            .filter(|(_, e)| e.timestamp < cutoff)
            .map(|(id, _)| *id)
            .collect();

        state.events.retain(|(id, _)| !expired.contains(id));
        state.requests.retain(|_, (id, _)| !expired.contains(id));
        state.responses.retain(|_, (id, _)| !expired.contains(id));
        Ok(before - state.events.len())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
