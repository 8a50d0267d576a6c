//! Distributed mutual exclusion over named resource keys.
//!
//! A lock is a coordination store entry `lock:<key>` holding a random token
//! with an expiry. Acquisition is set-if-absent; release is
//! compare-and-delete against the caller's token, so a holder can never
//! remove a lock that has since passed to someone else.
//!
//! No fencing token is issued. A holder whose lock expires mid-section
//! keeps running without learning that exclusivity was lost; callers must
//! size `ttl` well above the critical section's worst case.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use super::Error;
use super::ports::{
    CoordinationStore, CoordinationStoreError, NoOpReliabilityMetrics, ReliabilityMetrics,
    ReliabilityOutcome,
};
use super::runtime::{Sleeper, TokioSleeper};

const STORAGE_PREFIX: &str = "lock:";
const MIN_TTL: Duration = Duration::from_millis(1);

/// Validation errors for [`LockKey`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockKeyValidationError {
    /// The key was empty.
    #[error("lock key must not be empty")]
    Empty,
    /// The key contained whitespace or control characters.
    #[error("lock key must not contain whitespace or control characters")]
    InvalidCharacter,
}

/// Name of a shared resource, for example `slot-7`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    /// Validate and construct a lock key.
    ///
    /// ```
    /// # use clinic_backend::domain::LockKey;
    /// let key = LockKey::new("slot-7").expect("valid key");
    /// assert_eq!(key.storage_key(), "lock:slot-7");
    /// ```
    pub fn new(value: impl Into<String>) -> Result<Self, LockKeyValidationError> {
        let value = value.into();
        if value.is_empty() {
            return Err(LockKeyValidationError::Empty);
        }
        if value
            .chars()
            .any(|ch| ch.is_whitespace() || ch.is_control())
        {
            return Err(LockKeyValidationError::InvalidCharacter);
        }
        Ok(Self(value))
    }

    /// Borrow the resource name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Coordination store key for this resource.
    pub fn storage_key(&self) -> String {
        format!("{STORAGE_PREFIX}{}", self.0)
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Holder token proving ownership of one acquisition.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// Fresh 128-bit random token, hex encoded.
    pub fn generate() -> Self {
        Self(hex::encode(rand::random::<[u8; 16]>()))
    }

    /// Borrow the token string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LockToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// Tokens are credentials for release; keep them out of logs.
impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LockToken(..)")
    }
}

/// Acquisition tuning.
///
/// `acquire` makes one attempt plus up to `max_retries` retries, sleeping
/// `retry_interval` between attempts, so a caller may wait up to
/// `retry_interval * max_retries`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Lock expiry.
    pub ttl: Duration,
    /// Pause between attempts.
    pub retry_interval: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
}

impl LockOptions {
    /// Default expiry in milliseconds.
    pub const DEFAULT_TTL_MS: u64 = 15_000;
    /// Default pause between attempts in milliseconds.
    pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 50;
    /// Default retry count.
    pub const DEFAULT_MAX_RETRIES: u32 = 40;
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(Self::DEFAULT_TTL_MS),
            retry_interval: Duration::from_millis(Self::DEFAULT_RETRY_INTERVAL_MS),
            max_retries: Self::DEFAULT_MAX_RETRIES,
        }
    }
}

/// Failures surfaced by [`LockManager`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// Every attempt found the lock held.
    #[error("timed out acquiring lock {key} after {attempts} attempts")]
    Timeout {
        /// Resource name.
        key: String,
        /// Attempts made.
        attempts: u32,
    },
    /// The coordination store failed; the critical section must not run.
    #[error("lock {key} unavailable: {source}")]
    StoreUnavailable {
        /// Resource name.
        key: String,
        /// Underlying store failure.
        #[source]
        source: CoordinationStoreError,
    },
}

impl From<LockError> for Error {
    fn from(value: LockError) -> Self {
        match value {
            LockError::Timeout { key, attempts } => {
                Error::lock_timeout("resource is busy; retry later")
                    .with_details(json!({ "key": key, "attempts": attempts }))
            }
            LockError::StoreUnavailable { .. } => {
                Error::service_unavailable("coordination store unavailable")
            }
        }
    }
}

/// Acquires and releases distributed locks.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn CoordinationStore>,
    sleeper: Arc<dyn Sleeper>,
    defaults: LockOptions,
    metrics: Arc<dyn ReliabilityMetrics>,
}

impl LockManager {
    /// Create a manager that sleeps on the Tokio timer between retries.
    pub fn new(store: Arc<dyn CoordinationStore>, defaults: LockOptions) -> Self {
        Self::with_sleeper(store, defaults, Arc::new(TokioSleeper))
    }

    /// Create a manager with an explicit sleeper.
    pub fn with_sleeper(
        store: Arc<dyn CoordinationStore>,
        defaults: LockOptions,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            store,
            sleeper,
            defaults,
            metrics: Arc::new(NoOpReliabilityMetrics),
        }
    }

    /// Report outcomes to `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn ReliabilityMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Options used by [`LockManager::lock`].
    pub fn defaults(&self) -> LockOptions {
        self.defaults
    }

    /// Make one acquisition attempt.
    ///
    /// Returns `Ok(None)` when another holder owns the lock.
    pub async fn try_acquire(
        &self,
        key: &LockKey,
        ttl: Duration,
    ) -> Result<Option<LockToken>, LockError> {
        let token = LockToken::generate();
        let created = self
            .store
            .set_if_absent_with_expiry(
                &key.storage_key(),
                token.as_str().as_bytes(),
                ttl.max(MIN_TTL),
            )
            .await
            .map_err(|source| {
                warn!(error = %source, key = %key, "lock acquisition failed");
                LockError::StoreUnavailable {
                    key: key.to_string(),
                    source,
                }
            })?;
        Ok(created.then_some(token))
    }

    /// Acquire `key`, retrying while it is held.
    ///
    /// Dropping the returned future abandons the retry loop at its next
    /// suspension point.
    pub async fn acquire(
        &self,
        key: &LockKey,
        options: LockOptions,
    ) -> Result<LockToken, LockError> {
        let mut attempts = 0_u32;
        loop {
            attempts += 1;
            if let Some(token) = self.try_acquire(key, options.ttl).await? {
                debug!(key = %key, attempts, "lock acquired");
                self.metrics.record(ReliabilityOutcome::LockAcquired);
                return Ok(token);
            }
            if attempts > options.max_retries {
                debug!(key = %key, attempts, "lock acquisition timed out");
                self.metrics.record(ReliabilityOutcome::LockTimeout);
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    attempts,
                });
            }
            self.sleeper.sleep(options.retry_interval).await;
        }
    }

    /// Release `key` if `token` still owns it.
    ///
    /// Returns `false` when the lock expired or belongs to another holder;
    /// nothing is deleted in that case.
    pub async fn release(&self, key: &LockKey, token: &LockToken) -> Result<bool, LockError> {
        release_in(self.store.as_ref(), key, token).await
    }

    /// Acquire `key` with the default options and return a scoped guard.
    pub async fn lock(&self, key: &LockKey) -> Result<LockGuard, LockError> {
        self.lock_with(key, self.defaults).await
    }

    /// Acquire `key` with `options` and return a scoped guard.
    pub async fn lock_with(
        &self,
        key: &LockKey,
        options: LockOptions,
    ) -> Result<LockGuard, LockError> {
        let token = self.acquire(key, options).await?;
        Ok(LockGuard {
            store: Arc::clone(&self.store),
            key: key.clone(),
            token,
            released: false,
        })
    }

    /// Run `f` while holding `key`.
    ///
    /// Release is attempted on every exit path: completion and error return
    /// release inline; panics and cancellation release through the guard's
    /// `Drop`. Acquisition failures convert into `E`.
    ///
    /// ```rust,no_run
    /// # use clinic_backend::domain::{Error, LockKey, LockManager, LockOptions};
    /// # async fn book(locks: &LockManager) -> Result<(), Error> {
    /// let slot = LockKey::new("slot-7").map_err(|err| Error::invalid_request(err.to_string()))?;
    /// locks
    ///     .with_lock(&slot, LockOptions::default(), || async {
    ///         // check availability and write the booking
    ///         Ok::<_, Error>(())
    ///     })
    ///     .await
    /// # }
    /// ```
    pub async fn with_lock<F, Fut, T, E>(
        &self,
        key: &LockKey,
        options: LockOptions,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let guard = self.lock_with(key, options).await?;
        let outcome = f().await;
        match guard.release().await {
            Ok(true) => {}
            Ok(false) => warn!(key = %key, "lock expired before the critical section finished"),
            Err(err) => warn!(error = %err, key = %key, "lock release failed; waiting for expiry"),
        }
        outcome
    }
}

async fn release_in(
    store: &dyn CoordinationStore,
    key: &LockKey,
    token: &LockToken,
) -> Result<bool, LockError> {
    store
        .compare_and_delete(&key.storage_key(), token.as_str().as_bytes())
        .await
        .map_err(|source| LockError::StoreUnavailable {
            key: key.to_string(),
            source,
        })
}

/// Ownership of an acquired lock.
///
/// Call [`LockGuard::release`] to release inline. A guard dropped without a
/// completed release (panic, cancellation, early return) schedules the
/// release on the current Tokio runtime; outside a runtime the lock is left
/// to expire.
pub struct LockGuard {
    store: Arc<dyn CoordinationStore>,
    key: LockKey,
    token: LockToken,
    released: bool,
}

impl LockGuard {
    /// Locked resource.
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// Holder token for this acquisition.
    pub fn token(&self) -> &LockToken {
        &self.token
    }

    /// Release the lock, returning whether this call deleted it.
    pub async fn release(mut self) -> Result<bool, LockError> {
        let released = release_in(self.store.as_ref(), &self.key, &self.token).await?;
        self.released = true;
        Ok(released)
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, "no runtime to release lock; waiting for expiry");
            return;
        };
        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        let token = self.token.clone();
        handle.spawn(async move {
            if let Err(err) = release_in(store.as_ref(), &key, &token).await {
                warn!(error = %err, key = %key, "deferred lock release failed");
            }
        });
    }
}

#[cfg(test)]
mod tests;
