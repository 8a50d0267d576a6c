//! Hand-written port doubles for integration tests, where the crate's
//! `mockall` mocks are not compiled.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::ports::{
    CoordinationStore, CoordinationStoreError, EventPublisher, PublishError,
};

/// Publisher that records deliveries and rejects chosen topics.
#[derive(Default)]
pub struct RecordingPublisher {
    delivered: Mutex<Vec<(String, Value)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish to `topic` fail until [`Self::heal`] is called.
    pub fn fail_topic(&self, topic: impl Into<String>) {
        lock(&self.failing).insert(topic.into());
    }

    pub fn heal(&self, topic: &str) {
        lock(&self.failing).remove(topic);
    }

    pub fn delivered(&self) -> Vec<(String, Value)> {
        lock(&self.delivered).clone()
    }

    pub fn delivered_topics(&self) -> Vec<String> {
        lock(&self.delivered)
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), PublishError> {
        if lock(&self.failing).contains(topic) {
            return Err(PublishError::unavailable(format!("broker refused {topic}")));
        }
        lock(&self.delivered).push((topic.to_owned(), payload.clone()));
        Ok(())
    }
}

/// Coordination store whose every call fails as unreachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableCoordinationStore;

fn outage() -> CoordinationStoreError {
    CoordinationStoreError::unavailable("connection refused")
}

#[async_trait]
impl CoordinationStore for UnavailableCoordinationStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CoordinationStoreError> {
        Err(outage())
    }

    async fn set_if_absent_with_expiry(
        &self,
        _key: &str,
        _value: &[u8],
        _ttl: Duration,
    ) -> Result<bool, CoordinationStoreError> {
        Err(outage())
    }

    async fn incr_with_expiry(
        &self,
        _key: &str,
        _ttl: Duration,
    ) -> Result<u64, CoordinationStoreError> {
        Err(outage())
    }

    async fn compare_and_delete(
        &self,
        _key: &str,
        _expected: &[u8],
    ) -> Result<bool, CoordinationStoreError> {
        Err(outage())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(_) => panic!("test double mutex"),
    }
}
