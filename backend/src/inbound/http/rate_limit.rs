//! Admission-control middleware.
//!
//! Every request is counted against its client identity. Admitted
//! responses carry `x-ratelimit-limit` and `x-ratelimit-remaining`;
//! rejections become `429 rate_limited` with a `retry-after` header. When
//! the coordination store is down the request passes through unmetered and
//! no quota headers are attached.

use std::net::IpAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix_web::body::EitherBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use actix_web::{Error, HttpMessage, HttpResponse, ResponseError};
use futures_util::future::{LocalBoxFuture, Ready, ready};
use serde_json::json;

use crate::domain::{
    AdmissionDecision, ClientIdentity, Error as DomainError, RateLimiter, RateQuota,
};

/// Header reporting the per-window limit.
pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
/// Header reporting the requests left in the current window.
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Resolve the identity a request is metered against.
///
/// A [`ClientIdentity`] placed in the request extensions by an upstream
/// middleware wins; otherwise the peer IP address is used.
pub fn client_identity(req: &ServiceRequest) -> ClientIdentity {
    if let Some(identity) = req.extensions().get::<ClientIdentity>() {
        return identity.clone();
    }
    req.peer_addr()
        .map(|addr| addr.ip())
        .and_then(|ip: IpAddr| ClientIdentity::new(ip.to_string()).ok())
        .unwrap_or_else(ClientIdentity::unknown)
}

fn insert_quota_headers(headers: &mut HeaderMap, quota: &RateQuota) {
    headers.insert(
        HeaderName::from_static(RATE_LIMIT_LIMIT_HEADER),
        HeaderValue::from(quota.limit),
    );
    headers.insert(
        HeaderName::from_static(RATE_LIMIT_REMAINING_HEADER),
        HeaderValue::from(quota.remaining),
    );
}

fn rejection_response(quota: &RateQuota) -> HttpResponse {
    let retry_after = quota.retry_after_secs();
    let error = DomainError::rate_limited("rate limit exceeded").with_details(json!({
        "limit": quota.limit,
        "remaining": quota.remaining,
        "retryAfterSecs": retry_after,
    }));
    let mut response = error.error_response();
    let headers = response.headers_mut();
    headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    insert_quota_headers(headers, quota);
    response
}

/// Fixed-window rate limiting middleware.
///
/// # Examples
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use actix_web::App;
/// use clinic_backend::domain::{RateLimitConfig, RateLimiter};
/// use clinic_backend::inbound::http::RateLimit;
/// use clinic_backend::outbound::coordination::InMemoryCoordinationStore;
/// use mockable::DefaultClock;
///
/// let limiter = RateLimiter::new(
///     Arc::new(InMemoryCoordinationStore::new()),
///     Arc::new(DefaultClock),
///     RateLimitConfig::new(100, Duration::from_secs(60)),
/// );
/// let app = App::new().wrap(RateLimit::new(limiter));
/// ```
#[derive(Clone)]
pub struct RateLimit {
    limiter: Arc<RateLimiter>,
}

impl RateLimit {
    /// Wrap `limiter` as middleware.
    pub fn new(limiter: RateLimiter) -> Self {
        Self {
            limiter: Arc::new(limiter),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddleware {
            service: Rc::new(service),
            limiter: Arc::clone(&self.limiter),
        }))
    }
}

/// Service wrapper produced by [`RateLimit`].
pub struct RateLimitMiddleware<S> {
    service: Rc<S>,
    limiter: Arc<RateLimiter>,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let limiter = Arc::clone(&self.limiter);
        Box::pin(async move {
            let identity = client_identity(&req);
            match limiter.check(&identity).await {
                AdmissionDecision::Admitted(quota) => {
                    let http_req = req.request().clone();
                    // Inner failures are rendered here so the quota headers
                    // still reach the client.
                    let mut res = match service.call(req).await {
                        Ok(res) => res.map_into_left_body(),
                        Err(err) => ServiceResponse::new(http_req, err.error_response())
                            .map_into_right_body(),
                    };
                    insert_quota_headers(res.headers_mut(), &quota);
                    Ok(res)
                }
                AdmissionDecision::Rejected(quota) => {
                    let response = rejection_response(&quota);
                    Ok(req.into_response(response).map_into_right_body())
                }
                AdmissionDecision::Unmetered => {
                    let res = service.call(req).await?;
                    Ok(res.map_into_left_body())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{CoordinationStore, CoordinationStoreError, MockCoordinationStore};
    use crate::domain::{ErrorCode, RateLimitConfig};
    use crate::outbound::coordination::InMemoryCoordinationStore;
    use crate::test_support::MutableClock;
    use actix_web::{App, test, web};
    use chrono::{TimeZone, Utc};
    use rstest::{fixture, rstest};
    use std::net::SocketAddr;
    use std::time::Duration;

    #[fixture]
    fn clock() -> Arc<MutableClock> {
        Arc::new(MutableClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
                .single()
                .expect("valid timestamp"),
        ))
    }

    fn limiter_over(store: Arc<dyn CoordinationStore>, clock: Arc<MutableClock>) -> RateLimiter {
        RateLimiter::new(store, clock, RateLimitConfig::new(2, Duration::from_secs(10)))
    }

    fn peer(last: u8) -> SocketAddr {
        SocketAddr::from(([203, 0, 113, last], 40_000))
    }

    fn header<B>(res: &ServiceResponse<B>, name: &str) -> Option<String> {
        res.headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    }

    #[rstest]
    #[actix_web::test]
    async fn rejects_once_quota_is_spent(clock: Arc<MutableClock>) {
        let store = Arc::new(InMemoryCoordinationStore::with_clock(clock.clone()));
        let app = test::init_service(
            App::new()
                .wrap(RateLimit::new(limiter_over(store, clock)))
                .route("/bookings", web::post().to(|| async { HttpResponse::Created().finish() })),
        )
        .await;

        for remaining in ["1", "0"] {
            let req = test::TestRequest::post()
                .uri("/bookings")
                .peer_addr(peer(7))
                .to_request();
            let res = test::call_service(&app, req).await;
            assert_eq!(res.status(), actix_web::http::StatusCode::CREATED);
            assert_eq!(header(&res, RATE_LIMIT_LIMIT_HEADER).as_deref(), Some("2"));
            assert_eq!(header(&res, RATE_LIMIT_REMAINING_HEADER).as_deref(), Some(remaining));
        }

        let req = test::TestRequest::post()
            .uri("/bookings")
            .peer_addr(peer(7))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), actix_web::http::StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(&res, "retry-after").as_deref(), Some("10"));
        assert_eq!(header(&res, RATE_LIMIT_REMAINING_HEADER).as_deref(), Some("0"));
        let body: DomainError = test::read_body_json(res).await;
        assert_eq!(body.code(), ErrorCode::RateLimited);
        assert_eq!(
            body.details(),
            Some(&json!({"limit": 2, "remaining": 0, "retryAfterSecs": 10}))
        );

        // A different client has its own window.
        let req = test::TestRequest::post()
            .uri("/bookings")
            .peer_addr(peer(8))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), actix_web::http::StatusCode::CREATED);
    }

    #[rstest]
    #[actix_web::test]
    async fn extension_identity_overrides_peer_address(clock: Arc<MutableClock>) {
        let mut store = MockCoordinationStore::new();
        store
            .expect_incr_with_expiry()
            .withf(|key, _| key.starts_with("rl:patient:42:"))
            .times(1)
            .returning(|_, _| Ok(1));
        let app = test::init_service(
            App::new()
                .wrap(RateLimit::new(limiter_over(Arc::new(store), clock)))
                .wrap_fn(|req, srv| {
                    req.extensions_mut()
                        .insert(ClientIdentity::new("patient:42").expect("valid identity"));
                    srv.call(req)
                })
                .route("/", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        let req = test::TestRequest::get().uri("/").peer_addr(peer(9)).to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), actix_web::http::StatusCode::OK);
    }

    #[rstest]
    #[actix_web::test]
    async fn store_outage_admits_without_quota_headers(clock: Arc<MutableClock>) {
        let mut store = MockCoordinationStore::new();
        store
            .expect_incr_with_expiry()
            .returning(|_, _| Err(CoordinationStoreError::unavailable("connection refused")));
        let app = test::init_service(
            App::new()
                .wrap(RateLimit::new(limiter_over(Arc::new(store), clock)))
                .route("/", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        let req = test::TestRequest::get().uri("/").peer_addr(peer(7)).to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), actix_web::http::StatusCode::OK);
        assert!(header(&res, RATE_LIMIT_LIMIT_HEADER).is_none());
        assert!(header(&res, RATE_LIMIT_REMAINING_HEADER).is_none());
    }

    #[rstest]
    #[actix_web::test]
    async fn inner_failures_still_carry_quota_headers(clock: Arc<MutableClock>) {
        let store = Arc::new(InMemoryCoordinationStore::with_clock(clock.clone()));
        let app = test::init_service(
            App::new()
                .wrap_fn(|_req, _srv| {
                    std::future::ready(Err::<ServiceResponse, _>(
                        actix_web::error::ErrorInternalServerError("response body failed"),
                    ))
                })
                .wrap(RateLimit::new(limiter_over(store, clock)))
                .route("/bookings", web::post().to(|| async { HttpResponse::Created().finish() })),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/bookings")
            .peer_addr(peer(7))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(header(&res, RATE_LIMIT_LIMIT_HEADER).as_deref(), Some("2"));
        assert_eq!(header(&res, RATE_LIMIT_REMAINING_HEADER).as_deref(), Some("1"));
    }

    #[rstest]
    #[std::prelude::v1::test]
    fn missing_peer_address_falls_back_to_unknown() {
        let req = test::TestRequest::get().uri("/").to_srv_request();
        assert_eq!(client_identity(&req), ClientIdentity::unknown());
    }
}
