//! Port for the shared coordination store.
//!
//! The rate limiter, idempotency guard and lock manager coordinate across
//! instances exclusively through these four atomic primitives. Adapters must
//! execute each method as a single atomic operation on the backing store; a
//! read followed by a separate write is never an acceptable implementation.

use std::time::Duration;

use async_trait::async_trait;

use super::define_port_error;

define_port_error! {
    /// Errors raised by coordination store adapters.
    pub enum CoordinationStoreError {
        /// The store could not be reached or the connection dropped.
        Unavailable { message: String } => "coordination store unavailable: {message}"; retryable,
        /// The store rejected or failed to execute a command.
        Command { message: String } => "coordination store command failed: {message}",
        /// A stored value did not have the shape the operation requires.
        Corrupt { key: String } => "coordination store holds a malformed value for {key}",
    }
}

/// Atomic key-value primitives shared by every coordination component.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Read the live value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoordinationStoreError>;

    /// Store `value` under `key` with the given expiry only if the key is
    /// absent. Returns `true` when this call created the entry.
    async fn set_if_absent_with_expiry(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, CoordinationStoreError>;

    /// Atomically increment the counter under `key` and return the new
    /// value. The increment that creates the counter also sets its expiry to
    /// `ttl`; later increments leave the expiry untouched.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration)
    -> Result<u64, CoordinationStoreError>;

    /// Delete `key` only if its current value equals `expected`. Returns
    /// `true` when the entry was deleted.
    async fn compare_and_delete(
        &self,
        key: &str,
        expected: &[u8],
    ) -> Result<bool, CoordinationStoreError>;
}
