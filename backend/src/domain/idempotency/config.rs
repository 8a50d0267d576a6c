//! Configuration for idempotency behaviour.

use std::time::Duration;

/// Configuration for the idempotency guard.
///
/// Controls how long a stored response snapshot remains replayable.
///
/// # Example
///
/// ```
/// # use clinic_backend::domain::idempotency::IdempotencyConfig;
/// # use std::time::Duration;
/// let config = IdempotencyConfig::default();
/// assert_eq!(config.ttl(), Duration::from_secs(600));
///
/// let custom = IdempotencyConfig::with_ttl(Duration::from_secs(30));
/// assert_eq!(custom.ttl(), Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyConfig {
    ttl: Duration,
}

impl IdempotencyConfig {
    /// Default snapshot TTL in seconds (ten minutes).
    pub const DEFAULT_TTL_SECS: u64 = 600;

    /// Minimum TTL; the store rejects zero-length expiries.
    const MIN_TTL: Duration = Duration::from_secs(1);

    /// Create with an explicit TTL, clamped to at least one second.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: ttl.max(Self::MIN_TTL),
        }
    }

    /// Returns the configured TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(Self::DEFAULT_TTL_SECS),
        }
    }
}
