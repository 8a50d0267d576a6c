//! HTTP server configuration object and helpers.

use std::net::SocketAddr;
use std::sync::Arc;

use clinic_backend::domain::ports::{CoordinationStore, NoOpReliabilityMetrics, ReliabilityMetrics};
use clinic_backend::domain::{IdempotencyConfig, LockOptions, RateLimitConfig};

#[cfg(feature = "metrics")]
use actix_web_prom::PrometheusMetrics;

/// Builder-style configuration for creating the HTTP server.
pub struct ServerConfig {
    pub(crate) bind_addr: SocketAddr,
    pub(crate) store: Arc<dyn CoordinationStore>,
    pub(crate) rate_limit: RateLimitConfig,
    pub(crate) idempotency: IdempotencyConfig,
    pub(crate) lock: LockOptions,
    pub(crate) reliability_metrics: Arc<dyn ReliabilityMetrics>,
    #[cfg(feature = "metrics")]
    pub(crate) prometheus: Option<PrometheusMetrics>,
}

impl ServerConfig {
    /// Construct a server configuration with component defaults.
    #[must_use]
    pub fn new(bind_addr: SocketAddr, store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            bind_addr,
            store,
            rate_limit: RateLimitConfig::default(),
            idempotency: IdempotencyConfig::default(),
            lock: LockOptions::default(),
            reliability_metrics: Arc::new(NoOpReliabilityMetrics),
            #[cfg(feature = "metrics")]
            prometheus: None,
        }
    }

    #[must_use]
    pub fn with_rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = config;
        self
    }

    #[must_use]
    pub fn with_idempotency(mut self, config: IdempotencyConfig) -> Self {
        self.idempotency = config;
        self
    }

    #[must_use]
    pub fn with_lock_options(mut self, options: LockOptions) -> Self {
        self.lock = options;
        self
    }

    /// Report component outcomes to `metrics`.
    #[must_use]
    pub fn with_reliability_metrics(mut self, metrics: Arc<dyn ReliabilityMetrics>) -> Self {
        self.reliability_metrics = metrics;
        self
    }

    #[cfg(feature = "metrics")]
    /// Attach Prometheus middleware to the configuration.
    #[must_use]
    pub fn with_metrics(mut self, prometheus: Option<PrometheusMetrics>) -> Self {
        self.prometheus = prometheus;
        self
    }
}
