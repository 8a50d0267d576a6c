//! Response cache and replay for mutating requests.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::ports::{
    CoordinationStore, NoOpReliabilityMetrics, ReliabilityMetrics, ReliabilityOutcome,
};

use super::{IdempotencyConfig, IdempotencyKey, ResponseSnapshot};

/// Result of looking up a key before running the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyLookup {
    /// A snapshot exists; return it without running the handler.
    Replay(ResponseSnapshot),
    /// Nothing stored; run the handler and remember its response.
    Miss,
    /// The store failed; run the handler and store nothing.
    StoreUnavailable,
}

/// Result of remembering a handler response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RememberOutcome {
    /// The snapshot was written.
    Stored,
    /// A concurrent request already stored a snapshot; it was kept.
    AlreadyPresent,
    /// The response is a server error and was not stored.
    NotCacheable,
    /// The store failed; nothing was written.
    StoreUnavailable,
}

/// Coordinates snapshot lookup and storage for idempotency keys.
///
/// Lookup and store are separate round trips, so two concurrent first
/// requests with the same key can both run the handler. The store uses
/// set-if-absent, so the first snapshot written wins and is never replaced.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn CoordinationStore>,
    config: IdempotencyConfig,
    metrics: Arc<dyn ReliabilityMetrics>,
}

impl IdempotencyGuard {
    /// Create a guard over `store`.
    pub fn new(store: Arc<dyn CoordinationStore>, config: IdempotencyConfig) -> Self {
        Self {
            store,
            config,
            metrics: Arc::new(NoOpReliabilityMetrics),
        }
    }

    /// Report outcomes to `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn ReliabilityMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> IdempotencyConfig {
        self.config
    }

    /// Look up a stored snapshot for `key`.
    ///
    /// Store failures fail open. A snapshot that cannot be decoded is
    /// removed, provided it has not changed since it was read, and treated
    /// as a miss.
    pub async fn lookup(&self, key: &IdempotencyKey) -> IdempotencyLookup {
        let storage_key = key.storage_key();
        let stored = match self.store.get(&storage_key).await {
            Ok(stored) => stored,
            Err(err) => {
                warn!(error = %err, "idempotency lookup failed; executing without replay");
                self.metrics
                    .record(ReliabilityOutcome::IdempotencyStoreUnavailable);
                return IdempotencyLookup::StoreUnavailable;
            }
        };

        let Some(bytes) = stored else {
            self.metrics.record(ReliabilityOutcome::IdempotencyMiss);
            return IdempotencyLookup::Miss;
        };

        match ResponseSnapshot::decode(&bytes) {
            Ok(snapshot) => {
                debug!(status = snapshot.status(), "replaying stored response");
                self.metrics.record(ReliabilityOutcome::IdempotencyReplay);
                IdempotencyLookup::Replay(snapshot)
            }
            Err(err) => {
                warn!(error = %err, "discarding undecodable idempotency snapshot");
                if let Err(delete_err) = self.store.compare_and_delete(&storage_key, &bytes).await {
                    warn!(error = %delete_err, "failed to discard idempotency snapshot");
                }
                self.metrics.record(ReliabilityOutcome::IdempotencyMiss);
                IdempotencyLookup::Miss
            }
        }
    }

    /// Store `snapshot` under `key` unless one is already present.
    pub async fn remember(
        &self,
        key: &IdempotencyKey,
        snapshot: &ResponseSnapshot,
    ) -> RememberOutcome {
        if !snapshot.is_cacheable() {
            return RememberOutcome::NotCacheable;
        }
        let bytes = match snapshot.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "idempotency snapshot not stored");
                return RememberOutcome::NotCacheable;
            }
        };
        match self
            .store
            .set_if_absent_with_expiry(&key.storage_key(), &bytes, self.config.ttl())
            .await
        {
            Ok(true) => RememberOutcome::Stored,
            Ok(false) => {
                debug!("idempotency snapshot already stored by a concurrent request");
                RememberOutcome::AlreadyPresent
            }
            Err(err) => {
                warn!(error = %err, "idempotency snapshot not stored");
                RememberOutcome::StoreUnavailable
            }
        }
    }
}
