//! Backend entry-point: wires the coordination store, reliability middleware
//! and the outbox dispatcher, then serves HTTP until interrupted.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), forbid(clippy::expect_used))]

mod server;

use std::io;
use std::sync::Arc;

use actix_web::web;
#[cfg(feature = "metrics")]
use actix_web_prom::{PrometheusMetrics, PrometheusMetricsBuilder};
use mockable::DefaultClock;
use ortho_config::OrthoConfig;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use clinic_backend::ServiceSettings;
#[cfg(not(feature = "metrics"))]
use clinic_backend::domain::ports::NoOpReliabilityMetrics;
use clinic_backend::domain::ports::{CoordinationStore, ReliabilityMetrics};
use clinic_backend::domain::{DispatcherHandle, OutboxDispatcher};
use clinic_backend::inbound::http::health::HealthState;
#[cfg(feature = "metrics")]
use clinic_backend::outbound::metrics::PrometheusReliabilityMetrics;
use clinic_backend::outbound::coordination::{InMemoryCoordinationStore, RedisCoordinationStore};
use clinic_backend::outbound::persistence::{DbPool, DieselOutboxRepository};
use clinic_backend::outbound::publisher::LogEventPublisher;
use server::{ServerConfig, create_server};

fn coordination_store(settings: &ServiceSettings) -> io::Result<Arc<dyn CoordinationStore>> {
    match settings.redis_config() {
        Some(config) => {
            let store = RedisCoordinationStore::connect(&config)
                .map_err(|err| io::Error::other(format!("configure redis: {err}")))?;
            Ok(Arc::new(store))
        }
        None => {
            warn!(
                "CLINIC_REDIS_URL not set; using an in-process coordination store \
                 that does not coordinate across instances"
            );
            Ok(Arc::new(InMemoryCoordinationStore::new()))
        }
    }
}

fn spawn_dispatcher(
    settings: &ServiceSettings,
    metrics: Arc<dyn ReliabilityMetrics>,
) -> Option<DispatcherHandle> {
    let Some(pool_config) = settings.pool_config() else {
        warn!("CLINIC_DATABASE_URL not set; outbox dispatcher disabled");
        return None;
    };
    let repository = DieselOutboxRepository::new(DbPool::lazy(pool_config));
    let dispatcher = OutboxDispatcher::new(
        Arc::new(repository),
        Arc::new(LogEventPublisher),
        Arc::new(DefaultClock),
        settings.dispatcher_config(),
    )
    .with_metrics(metrics);
    Some(dispatcher.spawn())
}

#[cfg(feature = "metrics")]
fn make_metrics() -> io::Result<PrometheusMetrics> {
    PrometheusMetricsBuilder::new("clinic")
        .endpoint("/metrics")
        .build()
        .map_err(|err| io::Error::other(format!("configure Prometheus metrics: {err}")))
}

/// Application bootstrap.
#[actix_web::main]
async fn main() -> io::Result<()> {
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let settings = ServiceSettings::load_from_iter(std::env::args_os())
        .map_err(|err| io::Error::other(format!("load configuration: {err}")))?;
    let bind_addr = settings.bind_addr().map_err(io::Error::other)?;
    let store = coordination_store(&settings)?;
    let health_state = web::Data::new(HealthState::with_store(Arc::clone(&store)));

    #[cfg(feature = "metrics")]
    let prometheus = make_metrics()?;
    #[cfg(feature = "metrics")]
    let reliability_metrics: Arc<dyn ReliabilityMetrics> = Arc::new(
        PrometheusReliabilityMetrics::new(&prometheus.registry).map_err(|err| {
            io::Error::other(format!("reliability metrics registration failed: {err}"))
        })?,
    );
    #[cfg(not(feature = "metrics"))]
    let reliability_metrics: Arc<dyn ReliabilityMetrics> = Arc::new(NoOpReliabilityMetrics);

    let config = ServerConfig::new(bind_addr, store)
        .with_rate_limit(settings.rate_limit_config())
        .with_idempotency(settings.idempotency_config())
        .with_lock_options(settings.lock_options())
        .with_reliability_metrics(Arc::clone(&reliability_metrics));
    #[cfg(feature = "metrics")]
    let config = config.with_metrics(Some(prometheus));

    let dispatcher = spawn_dispatcher(&settings, reliability_metrics);
    let server = create_server(health_state.clone(), config)?;
    info!(%bind_addr, "clinic backend listening");

    let result = server.await;
    health_state.mark_unhealthy();
    if let Some(handle) = dispatcher {
        handle.shutdown().await;
    }
    result
}
