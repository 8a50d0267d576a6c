//! In-process coordination store.
//!
//! Mirrors the Redis adapter's semantics, including expiry and the decimal
//! encoding of counters, so components behave identically in tests and in
//! single-instance development. State is private to the process and does not
//! coordinate across instances.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use mockable::{Clock, DefaultClock};

use crate::domain::ports::{CoordinationStore, CoordinationStoreError};

/// Inserts between sweeps of expired entries. Keys such as rate-limit
/// windows are never touched again once they expire, so they are only
/// reclaimed by a sweep.
const SWEEP_INTERVAL: usize = 256;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

/// Coordination store held in process memory.
#[derive(Clone)]
pub struct InMemoryCoordinationStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    inserts: Arc<AtomicUsize>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryCoordinationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCoordinationStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(DefaultClock))
    }

    /// Create an empty store whose expiry follows `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            inserts: Arc::new(AtomicUsize::new(0)),
            clock,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> Result<usize, CoordinationStoreError> {
        let now = self.clock.utc();
        let entries = self.lock()?;
        Ok(entries.values().filter(|entry| entry.expires_at > now).count())
    }

    /// Whether the store holds no live entries.
    pub fn is_empty(&self) -> Result<bool, CoordinationStoreError> {
        self.len().map(|len| len == 0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>, CoordinationStoreError> {
        self.entries
            .lock()
            .map_err(|_| CoordinationStoreError::unavailable("in-memory store lock poisoned"))
    }

    #[cfg(test)]
    fn held(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or_default()
    }

    /// Insert `entry`, sweeping expired entries every [`SWEEP_INTERVAL`]
    /// inserts.
    fn insert(
        &self,
        entries: &mut HashMap<String, Entry>,
        key: &str,
        entry: Entry,
        now: DateTime<Utc>,
    ) {
        let inserted = self.inserts.fetch_add(1, Ordering::Relaxed) + 1;
        if inserted % SWEEP_INTERVAL == 0 {
            entries.retain(|_, held| held.expires_at > now);
        }
        entries.insert(key.to_owned(), entry);
    }

    fn expiry(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<DateTime<Utc>, CoordinationStoreError> {
        let delta = TimeDelta::from_std(ttl).map_err(|err| {
            CoordinationStoreError::command(format!("expiry out of range: {err}"))
        })?;
        now.checked_add_signed(delta)
            .ok_or_else(|| CoordinationStoreError::command("expiry out of range"))
    }
}

/// Drop `key` if it has expired and return the live entry, if any.
fn live<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now: DateTime<Utc>,
) -> Option<&'a mut Entry> {
    if entries
        .get(key)
        .is_some_and(|entry| entry.expires_at <= now)
    {
        entries.remove(key);
    }
    entries.get_mut(key)
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoordinationStoreError> {
        let now = self.clock.utc();
        let mut entries = self.lock()?;
        Ok(live(&mut entries, key, now).map(|entry| entry.value.clone()))
    }

    async fn set_if_absent_with_expiry(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, CoordinationStoreError> {
        let now = self.clock.utc();
        let expires_at = self.expiry(now, ttl)?;
        let mut entries = self.lock()?;
        if live(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        self.insert(
            &mut entries,
            key,
            Entry {
                value: value.to_vec(),
                expires_at,
            },
            now,
        );
        Ok(true)
    }

    async fn incr_with_expiry(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<u64, CoordinationStoreError> {
        let now = self.clock.utc();
        let expires_at = self.expiry(now, ttl)?;
        let mut entries = self.lock()?;
        if let Some(entry) = live(&mut entries, key, now) {
            let current = std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|text| text.parse::<u64>().ok())
                .ok_or_else(|| CoordinationStoreError::corrupt(key))?;
            let next = current.saturating_add(1);
            entry.value = next.to_string().into_bytes();
            return Ok(next);
        }
        self.insert(
            &mut entries,
            key,
            Entry {
                value: b"1".to_vec(),
                expires_at,
            },
            now,
        );
        Ok(1)
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        expected: &[u8],
    ) -> Result<bool, CoordinationStoreError> {
        let now = self.clock.utc();
        let mut entries = self.lock()?;
        let matches = live(&mut entries, key, now).is_some_and(|entry| entry.value == expected);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }
}
