//! Fixed-window admission control.
//!
//! Each client identity owns one counter per window, where the window id is
//! `floor(now / window)`. Admission costs a single atomic increment in the
//! coordination store; the increment that creates a counter sets its expiry
//! to the window length.
//!
//! Fixed windows are not smoothed: a client can spend its whole quota at the
//! end of one window and again at the start of the next, admitting up to
//! twice the limit across a boundary.

use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;
use tracing::{debug, warn};

use super::ClientIdentity;
use super::ports::{
    CoordinationStore, NoOpReliabilityMetrics, ReliabilityMetrics, ReliabilityOutcome,
};

const STORAGE_PREFIX: &str = "rl";

/// Quota and window length for the limiter.
///
/// # Example
///
/// ```
/// # use clinic_backend::domain::RateLimitConfig;
/// # use std::time::Duration;
/// let config = RateLimitConfig::default();
/// assert_eq!(config.limit(), 100);
/// assert_eq!(config.window(), Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    limit: u64,
    window: Duration,
}

impl RateLimitConfig {
    /// Default number of requests admitted per window.
    pub const DEFAULT_LIMIT: u64 = 100;
    /// Default window length in seconds.
    pub const DEFAULT_WINDOW_SECS: u64 = 60;

    const MIN_WINDOW: Duration = Duration::from_millis(1);

    /// Create a configuration. A zero limit is raised to one and the window
    /// to at least one millisecond.
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window: window.max(Self::MIN_WINDOW),
        }
    }

    /// Requests admitted per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_LIMIT,
            Duration::from_secs(Self::DEFAULT_WINDOW_SECS),
        )
    }
}

/// Quota state observed by one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateQuota {
    /// Requests admitted per window.
    pub limit: u64,
    /// Requests left in the current window, never negative.
    pub remaining: u64,
    /// Time until the current window ends.
    pub reset_after: Duration,
}

impl RateQuota {
    /// Whole seconds a rejected client should wait, at least one.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        let rounded = if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        };
        rounded.max(1)
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Within quota.
    Admitted(RateQuota),
    /// Quota exhausted for this window.
    Rejected(RateQuota),
    /// The store failed; the request proceeds without metering.
    Unmetered,
}

impl AdmissionDecision {
    /// Whether the request may proceed.
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }

    /// Quota observed, absent when unmetered.
    pub fn quota(&self) -> Option<RateQuota> {
        match self {
            Self::Admitted(quota) | Self::Rejected(quota) => Some(*quota),
            Self::Unmetered => None,
        }
    }
}

/// Fixed-window rate limiter backed by the coordination store.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CoordinationStore>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
    metrics: Arc<dyn ReliabilityMetrics>,
}

impl RateLimiter {
    /// Create a limiter.
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        clock: Arc<dyn Clock>,
        config: RateLimitConfig,
    ) -> Self {
        Self {
            store,
            clock,
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
    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Count one request for `identity` and decide whether to admit it.
    ///
    /// Store failures fail open and yield [`AdmissionDecision::Unmetered`].
    pub async fn check(&self, identity: &ClientIdentity) -> AdmissionDecision {
        let window_ms = u64::try_from(self.config.window.as_millis()).unwrap_or(u64::MAX);
        let now_ms = u64::try_from(self.clock.utc().timestamp_millis()).unwrap_or(0);
        let window_id = now_ms / window_ms;
        let elapsed_ms = now_ms % window_ms;
        let reset_after = Duration::from_millis(window_ms - elapsed_ms);

        let key = format!("{STORAGE_PREFIX}:{identity}:{window_id}");
        let count = match self.store.incr_with_expiry(&key, self.config.window).await {
            Ok(count) => count,
            Err(err) => {
                warn!(
                    error = %err,
                    identity = %identity,
                    "rate limiter store failed; admitting unmetered"
                );
                self.metrics.record(ReliabilityOutcome::RateLimitUnmetered);
                return AdmissionDecision::Unmetered;
            }
        };

        let quota = RateQuota {
            limit: self.config.limit,
            remaining: self.config.limit.saturating_sub(count),
            reset_after,
        };
        if count > self.config.limit {
            debug!(identity = %identity, count, "rate limit exceeded");
            self.metrics.record(ReliabilityOutcome::RateLimitRejected);
            AdmissionDecision::Rejected(quota)
        } else {
            self.metrics.record(ReliabilityOutcome::RateLimitAdmitted);
            AdmissionDecision::Admitted(quota)
        }
    }
}
