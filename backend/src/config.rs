//! Service configuration loaded via OrthoConfig.
//!
//! Values layer CLI flags over `CLINIC_*` environment variables over config
//! files. The bind address has a layer default; every other setting is
//! optional and its accessor falls back to the component default, so an
//! empty environment yields a runnable single-instance service.

use std::net::SocketAddr;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::domain::{IdempotencyConfig, LockOptions, OutboxDispatcherConfig, RateLimitConfig};
use crate::outbound::coordination::RedisConfig;
use crate::outbound::persistence::PoolConfig;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Errors raised while interpreting loaded settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The bind address is not `host:port`.
    #[error("invalid bind address {value:?}: {source}")]
    InvalidBindAddr {
        /// Configured value.
        value: String,
        /// Parser failure.
        #[source]
        source: std::net::AddrParseError,
    },
}

/// Configuration values for the reliability services.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "CLINIC")]
pub struct ServiceSettings {
    /// Socket address the HTTP server binds to.
    #[ortho_config(default = DEFAULT_BIND_ADDR.to_owned())]
    pub bind_addr: String,
    /// Redis URL for the shared coordination store. Absent means an
    /// in-process store that does not coordinate across instances.
    pub redis_url: Option<String>,
    /// Maximum pooled Redis connections.
    pub redis_pool_size: Option<u32>,
    /// PostgreSQL URL for the outbox table. Absent disables the dispatcher.
    pub database_url: Option<String>,
    /// Maximum pooled database connections.
    pub database_pool_size: Option<u32>,
    /// Requests admitted per client per window.
    pub rate_limit_requests: Option<u64>,
    /// Rate limit window length in seconds.
    pub rate_limit_window_secs: Option<u64>,
    /// Lifetime of stored idempotent responses in seconds.
    pub idempotency_ttl_secs: Option<u64>,
    /// Lock expiry in milliseconds.
    pub lock_ttl_ms: Option<u64>,
    /// Pause between lock attempts in milliseconds.
    pub lock_retry_interval_ms: Option<u64>,
    /// Lock retries after the first attempt.
    pub lock_max_retries: Option<u32>,
    /// Events fetched per dispatcher cycle.
    pub outbox_batch_size: Option<usize>,
    /// Dispatcher idle poll interval in milliseconds.
    pub outbox_poll_interval_ms: Option<u64>,
}

impl ServiceSettings {
    /// Parse the bind address. Defaults to `0.0.0.0:8080`.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::InvalidBindAddr`] when the value is not a
    /// socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, SettingsError> {
        self.bind_addr
            .parse()
            .map_err(|source| SettingsError::InvalidBindAddr {
                value: self.bind_addr.clone(),
                source,
            })
    }

    /// Redis settings, when a URL is configured.
    pub fn redis_config(&self) -> Option<RedisConfig> {
        let url = self.redis_url.as_deref()?;
        let config = RedisConfig::new(url);
        Some(match self.redis_pool_size {
            Some(size) => config.with_max_size(size),
            None => config,
        })
    }

    /// Database pool settings, when a URL is configured.
    pub fn pool_config(&self) -> Option<PoolConfig> {
        let url = self.database_url.as_deref()?;
        let config = PoolConfig::new(url);
        Some(match self.database_pool_size {
            Some(size) => config.with_max_size(size),
            None => config,
        })
    }

    /// Rate limiter settings over the component defaults.
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig::new(
            self.rate_limit_requests
                .unwrap_or(RateLimitConfig::DEFAULT_LIMIT),
            Duration::from_secs(
                self.rate_limit_window_secs
                    .unwrap_or(RateLimitConfig::DEFAULT_WINDOW_SECS),
            ),
        )
    }

    /// Idempotency settings over the component defaults.
    pub fn idempotency_config(&self) -> IdempotencyConfig {
        IdempotencyConfig::with_ttl(Duration::from_secs(
            self.idempotency_ttl_secs
                .unwrap_or(IdempotencyConfig::DEFAULT_TTL_SECS),
        ))
    }

    /// Lock acquisition settings over the component defaults.
    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            ttl: Duration::from_millis(
                self.lock_ttl_ms.unwrap_or(LockOptions::DEFAULT_TTL_MS),
            ),
            retry_interval: Duration::from_millis(
                self.lock_retry_interval_ms
                    .unwrap_or(LockOptions::DEFAULT_RETRY_INTERVAL_MS),
            ),
            max_retries: self
                .lock_max_retries
                .unwrap_or(LockOptions::DEFAULT_MAX_RETRIES),
        }
    }

    /// Outbox dispatcher settings over the component defaults.
    pub fn dispatcher_config(&self) -> OutboxDispatcherConfig {
        OutboxDispatcherConfig::new(
            self.outbox_batch_size
                .unwrap_or(OutboxDispatcherConfig::DEFAULT_BATCH_SIZE),
            Duration::from_millis(
                self.outbox_poll_interval_ms
                    .unwrap_or(OutboxDispatcherConfig::DEFAULT_POLL_INTERVAL_MS),
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for service configuration parsing.

    use super::*;
    use std::ffi::OsString;

    use env_lock::lock_env;
    use rstest::rstest;

    const VARS: [&str; 13] = [
        "CLINIC_BIND_ADDR",
        "CLINIC_REDIS_URL",
        "CLINIC_REDIS_POOL_SIZE",
        "CLINIC_DATABASE_URL",
        "CLINIC_DATABASE_POOL_SIZE",
        "CLINIC_RATE_LIMIT_REQUESTS",
        "CLINIC_RATE_LIMIT_WINDOW_SECS",
        "CLINIC_IDEMPOTENCY_TTL_SECS",
        "CLINIC_LOCK_TTL_MS",
        "CLINIC_LOCK_RETRY_INTERVAL_MS",
        "CLINIC_LOCK_MAX_RETRIES",
        "CLINIC_OUTBOX_BATCH_SIZE",
        "CLINIC_OUTBOX_POLL_INTERVAL_MS",
    ];

    fn load_from_empty_args() -> ServiceSettings {
        ServiceSettings::load_from_iter([OsString::from("clinic-backend")])
            .expect("config should load")
    }

    fn env_with(overrides: &[(&str, &str)]) -> Vec<(&'static str, Option<String>)> {
        VARS.iter()
            .map(|name| {
                let value = overrides
                    .iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| (*value).to_owned());
                (*name, value)
            })
            .collect()
    }

    #[rstest]
    fn default_values_are_used_when_missing() {
        let _guard = lock_env(env_with(&[]));

        let settings = load_from_empty_args();
        assert_eq!(settings.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(
            settings.bind_addr().expect("default bind address"),
            SocketAddr::from(([0, 0, 0, 0], 8080))
        );
        assert!(settings.redis_config().is_none());
        assert!(settings.pool_config().is_none());
        assert_eq!(
            settings.rate_limit_config(),
            RateLimitConfig::new(100, Duration::from_secs(60))
        );
        assert_eq!(settings.idempotency_config(), IdempotencyConfig::default());
        assert_eq!(settings.lock_options(), LockOptions::default());
        assert_eq!(
            settings.dispatcher_config(),
            OutboxDispatcherConfig::default()
        );
    }

    #[rstest]
    fn environment_overrides_are_respected() {
        let _guard = lock_env(env_with(&[
            ("CLINIC_BIND_ADDR", "127.0.0.1:9090"),
            ("CLINIC_REDIS_URL", "redis://cache:6379"),
            ("CLINIC_DATABASE_URL", "postgres://clinic@db/clinic"),
            ("CLINIC_DATABASE_POOL_SIZE", "4"),
            ("CLINIC_RATE_LIMIT_REQUESTS", "2"),
            ("CLINIC_RATE_LIMIT_WINDOW_SECS", "10"),
            ("CLINIC_IDEMPOTENCY_TTL_SECS", "30"),
            ("CLINIC_LOCK_MAX_RETRIES", "3"),
            ("CLINIC_OUTBOX_POLL_INTERVAL_MS", "500"),
        ]));

        let settings = load_from_empty_args();
        assert_eq!(
            settings.bind_addr().expect("bind address"),
            SocketAddr::from(([127, 0, 0, 1], 9090))
        );
        assert!(settings.redis_config().is_some());
        let pool = settings.pool_config().expect("pool config");
        assert_eq!(pool.database_url(), "postgres://clinic@db/clinic");
        assert_eq!(pool.max_size(), 4);
        assert_eq!(
            settings.rate_limit_config(),
            RateLimitConfig::new(2, Duration::from_secs(10))
        );
        assert_eq!(
            settings.idempotency_config().ttl(),
            Duration::from_secs(30)
        );
        let lock = settings.lock_options();
        assert_eq!(lock.max_retries, 3);
        assert_eq!(lock.ttl, Duration::from_millis(LockOptions::DEFAULT_TTL_MS));
        assert_eq!(
            settings.dispatcher_config().poll_interval(),
            Duration::from_millis(500)
        );
    }

    #[rstest]
    fn malformed_bind_address_is_reported() {
        let _guard = lock_env(env_with(&[("CLINIC_BIND_ADDR", "localhost")]));

        let err = load_from_empty_args()
            .bind_addr()
            .expect_err("not a socket address");
        assert!(matches!(
            err,
            SettingsError::InvalidBindAddr { ref value, .. } if value == "localhost"
        ));
    }
}
