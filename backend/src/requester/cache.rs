use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Minimum time between two sweeps of expired entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// One cached upstream payload. An entry whose expiry lies beyond what
/// `Instant` can represent has `expiry: None` and never expires.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Value,
    pub expiry: Option<Instant>,
}

impl CacheEntry {
    pub fn is_live(&self, now: Instant) -> bool {
        self.expiry.map_or(true, |expiry| now < expiry)
    }
}

/// TTL cache of sanitized upstream payloads.
///
/// Every method takes the lock only for the duration of the map access.
pub struct ResponseCache {
    ttl: Duration,
    state: Mutex<CacheState>,
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    last_sweep: Instant,
}

impl ResponseCache {
    pub fn new(ttl: Duration, now: Instant) -> Self {
        Self {
            ttl,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                last_sweep: now,
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Drop expired entries if more than [`SWEEP_INTERVAL`] has passed
    /// since the last sweep. Returns the number of entries removed.
    pub fn sweep_if_due(&self, now: Instant) -> usize {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if now.saturating_duration_since(state.last_sweep) <= SWEEP_INTERVAL {
            return 0;
        }

        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.is_live(now));
        state.last_sweep = now;
        before - state.entries.len()
    }

    /// Copy of the payload under `key`, if present and not expired.
    pub fn lookup(&self, key: &str, now: Instant) -> Option<Value> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.payload.clone())
    }

    /// Store `payload` under `key` with a fresh expiry, replacing any
    /// previous entry.
    pub fn store(&self, key: String, payload: Value, now: Instant) {
        let entry = CacheEntry {
            payload,
            expiry: now.checked_add(self.ttl),
        };
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.entries.insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Serialize)]
struct KeyMaterial<'a> {
    url: &'a str,
    method: &'a str,
    params: &'a BTreeMap<String, String>,
    headers: &'a BTreeMap<String, String>,
    body: Option<&'a Value>,
}

/// Hex SHA-256 over the call's identifying inputs. Maps are ordered, so
/// equal inputs always hash equally.
pub fn cache_key(
    method: &str,
    url: &str,
    params: &BTreeMap<String, String>,
    headers: &BTreeMap<String, String>,
    body: Option<&Value>,
) -> String {
    let material = KeyMaterial {
        url,
        method,
        params,
        headers,
        body,
    };
    // Serializing string maps and a Value cannot fail.
    let encoded = serde_json::to_vec(&material).unwrap_or_default();
    hex::encode(Sha256::digest(&encoded))
}
