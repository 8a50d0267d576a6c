//! Port for recording reliability outcomes.
//!
//! Every coordination component reports what it decided through this port.
//! Recording is best-effort and synchronous; adapters must not block.

/// Outcome reported by a coordination component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReliabilityOutcome {
    /// A stored response was replayed.
    IdempotencyReplay,
    /// No stored response existed; the handler ran.
    IdempotencyMiss,
    /// The store failed during lookup; the guard failed open.
    IdempotencyStoreUnavailable,
    /// Request admitted within quota.
    RateLimitAdmitted,
    /// Request rejected for exceeding quota.
    RateLimitRejected,
    /// The store failed; the limiter admitted the request unmetered.
    RateLimitUnmetered,
    /// A lock was acquired.
    LockAcquired,
    /// Every acquisition attempt found the lock held.
    LockTimeout,
    /// An outbox event was published and marked processed.
    OutboxPublished,
    /// Publishing an outbox event failed; it stays pending.
    OutboxPublishFailed,
}

impl ReliabilityOutcome {
    /// Component label (`idempotency`, `rate_limit`, `lock`, `outbox`).
    pub fn component(self) -> &'static str {
        match self {
            Self::IdempotencyReplay | Self::IdempotencyMiss | Self::IdempotencyStoreUnavailable => {
                "idempotency"
            }
            Self::RateLimitAdmitted | Self::RateLimitRejected | Self::RateLimitUnmetered => {
                "rate_limit"
            }
            Self::LockAcquired | Self::LockTimeout => "lock",
            Self::OutboxPublished | Self::OutboxPublishFailed => "outbox",
        }
    }

    /// Outcome label within the component.
    pub fn outcome(self) -> &'static str {
        match self {
            Self::IdempotencyReplay => "replay",
            Self::IdempotencyMiss => "miss",
            Self::IdempotencyStoreUnavailable | Self::RateLimitUnmetered => "store_unavailable",
            Self::RateLimitAdmitted => "admitted",
            Self::RateLimitRejected => "rejected",
            Self::LockAcquired => "acquired",
            Self::LockTimeout => "timeout",
            Self::OutboxPublished => "published",
            Self::OutboxPublishFailed => "publish_failed",
        }
    }
}

/// Metrics sink for [`ReliabilityOutcome`]s.
#[cfg_attr(test, mockall::automock)]
pub trait ReliabilityMetrics: Send + Sync {
    /// Record one occurrence of `outcome`.
    fn record(&self, outcome: ReliabilityOutcome);
}

/// No-op implementation for when metrics are disabled or in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpReliabilityMetrics;

impl ReliabilityMetrics for NoOpReliabilityMetrics {
    fn record(&self, _outcome: ReliabilityOutcome) {}
}
