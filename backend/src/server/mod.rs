//! Server construction and middleware wiring.

mod config;
#[cfg(feature = "metrics")]
mod metrics;

pub use config::ServerConfig;
#[cfg(feature = "metrics")]
use metrics::PrometheusLayer;

use std::sync::Arc;

use actix_web::body::MessageBody;
use actix_web::dev::{Server, ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::{App, HttpServer, web};
use mockable::DefaultClock;

use clinic_backend::domain::{IdempotencyGuard, LockManager, RateLimiter};
use clinic_backend::inbound::http::health::{HealthState, live, ready};
use clinic_backend::{Idempotency, RateLimit, Trace};

#[derive(Clone)]
struct AppDependencies {
    health_state: web::Data<HealthState>,
    lock_manager: web::Data<LockManager>,
    limiter: RateLimiter,
    guard: IdempotencyGuard,
}

fn build_dependencies(
    health_state: web::Data<HealthState>,
    config: &ServerConfig,
) -> AppDependencies {
    let metrics = Arc::clone(&config.reliability_metrics);
    let limiter = RateLimiter::new(
        Arc::clone(&config.store),
        Arc::new(DefaultClock),
        config.rate_limit,
    )
    .with_metrics(Arc::clone(&metrics));
    let guard = IdempotencyGuard::new(Arc::clone(&config.store), config.idempotency)
        .with_metrics(Arc::clone(&metrics));
    let lock_manager =
        LockManager::new(Arc::clone(&config.store), config.lock).with_metrics(metrics);

    AppDependencies {
        health_state,
        lock_manager: web::Data::new(lock_manager),
        limiter,
        guard,
    }
}

fn build_app(
    deps: AppDependencies,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    let AppDependencies {
        health_state,
        lock_manager,
        limiter,
        guard,
    } = deps;

    // Probes sit outside the metered scope so orchestrator polling never
    // consumes client quota.
    let api = web::scope("/api/v1")
        .wrap(Idempotency::new(guard))
        .wrap(RateLimit::new(limiter));

    App::new()
        .app_data(health_state)
        .app_data(lock_manager)
        .wrap(Trace)
        .service(ready)
        .service(live)
        .service(api)
}

/// Construct an Actix HTTP server using the provided health state and configuration.
///
/// Domain routers register under `/api/v1`, behind the rate limiter and the
/// idempotency guard. A [`LockManager`] is available to them as app data.
///
/// # Errors
/// Propagates [`std::io::Error`] when binding the socket or starting the server fails.
pub fn create_server(
    health_state: web::Data<HealthState>,
    config: ServerConfig,
) -> std::io::Result<Server> {
    let deps = build_dependencies(health_state.clone(), &config);
    let bind_addr = config.bind_addr;
    #[cfg(feature = "metrics")]
    let metrics_layer = PrometheusLayer::from(config.prometheus);

    let server = HttpServer::new(move || {
        let app = build_app(deps.clone());

        #[cfg(feature = "metrics")]
        let app = app.wrap(metrics_layer.clone());

        app
    })
    .bind(bind_addr)?
    .run();

    health_state.mark_ready();
    Ok(server)
}
