//! Health endpoints: liveness & readiness probes for orchestration and load balancers.
//!
//! Readiness also pings the coordination store when one is attached. Rate
//! limiting and idempotency fail open without it, but locked writes fail
//! closed, so an instance that cannot reach the store is taken out of
//! rotation.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use actix_web::{HttpResponse, HttpResponseBuilder, get, http::header, web};
use serde_json::json;
use tracing::warn;

use crate::domain::ports::CoordinationStore;

const STORE_PROBE_KEY: &str = "health:probe";

/// Shared health state for readiness and liveness checks.
pub struct HealthState {
    ready: AtomicBool,
    live: AtomicBool,
    store: Option<Arc<dyn CoordinationStore>>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            ready: AtomicBool::new(false),
            live: AtomicBool::new(true),
            store: None,
        }
    }
}

impl HealthState {
    /// Create a new health state starting as not ready but live.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a health state whose readiness requires a reachable `store`.
    pub fn with_store(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::default()
        }
    }

    /// Mark the service as ready.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Flag the service as unhealthy so liveness checks fail fast during shutdown.
    pub fn mark_unhealthy(&self) {
        self.live.store(false, Ordering::Release);
    }

    /// Return readiness state.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Return liveness state. When false, liveness probes emit 503 to trigger restarts.
    pub fn is_alive(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Whether the attached coordination store answers a read.
    pub async fn store_reachable(&self) -> bool {
        let Some(store) = &self.store else {
            return true;
        };
        match store.get(STORE_PROBE_KEY).await {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "readiness probe cannot reach the coordination store");
                false
            }
        }
    }
}

fn probe_response(probe_ok: bool) -> HttpResponseBuilder {
    let mut response = if probe_ok {
        HttpResponse::Ok()
    } else {
        HttpResponse::ServiceUnavailable()
    };
    response.insert_header((header::CACHE_CONTROL, "no-store"));
    response
}

/// Readiness probe. 200 once the listener is bound and the coordination
/// store answers; 503 otherwise.
#[get("/health/ready")]
pub async fn ready(state: web::Data<HealthState>) -> HttpResponse {
    let started = state.is_ready();
    let store_up = state.store_reachable().await;
    probe_response(started && store_up).json(json!({
        "started": started,
        "coordinationStore": if store_up { "up" } else { "down" },
    }))
}

/// Liveness probe. 200 while the process is marked alive and 503 once draining.
/// Call `HealthState::mark_unhealthy` before graceful shutdown to surface the drain early.
#[get("/health/live")]
pub async fn live(state: web::Data<HealthState>) -> HttpResponse {
    probe_response(state.is_alive()).finish()
}
