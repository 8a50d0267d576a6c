//! Idempotency middleware for mutating requests.
//!
//! `POST`, `PUT`, `PATCH` and `DELETE` requests carrying an
//! `Idempotency-Key` header are answered from the stored snapshot when one
//! exists. Otherwise the handler runs and a non-5xx response is buffered,
//! stored and returned. Requests without the header, or with an empty one,
//! are never intercepted.

use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix_web::body::{BoxBody, EitherBody, MessageBody, to_bytes};
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use actix_web::http::{Method, StatusCode};
use actix_web::{Error, HttpResponse, ResponseError};
use futures_util::future::{LocalBoxFuture, Ready, ready};
use serde_json::json;
use tracing::{debug, warn};

use crate::domain::{
    Error as DomainError, IdempotencyGuard, IdempotencyKey, IdempotencyLookup, ResponseSnapshot,
    idempotency::IdempotencyKeyValidationError,
};

/// HTTP header name for idempotency keys.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Header appended to replayed responses.
pub const IDEMPOTENT_REPLAY_HEADER: &str = "idempotent-replay";

/// Extract the idempotency key from request headers.
///
/// A missing or empty header yields `Ok(None)`.
pub fn extract_idempotency_key(
    headers: &HeaderMap,
) -> Result<Option<IdempotencyKey>, IdempotencyKeyValidationError> {
    let Some(header_value) = headers.get(IDEMPOTENCY_KEY_HEADER) else {
        return Ok(None);
    };
    if header_value.is_empty() {
        return Ok(None);
    }

    let key_str = header_value
        .to_str()
        .map_err(|_| IdempotencyKeyValidationError::InvalidCharacter)?;

    IdempotencyKey::new(key_str).map(Some)
}

/// Map idempotency key validation errors to domain errors.
pub fn map_idempotency_key_error(err: IdempotencyKeyValidationError) -> DomainError {
    DomainError::invalid_request(format!("idempotency-key header is invalid: {err}"))
        .with_details(json!({ "header": IDEMPOTENCY_KEY_HEADER }))
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

#[derive(Debug, thiserror::Error)]
enum ReplayError {
    #[error("stored status {0} is not usable")]
    Status(u16),
    #[error("stored header {0:?} is not usable")]
    Header(String),
}

fn replay_response(snapshot: &ResponseSnapshot) -> Result<HttpResponse, ReplayError> {
    let status = StatusCode::from_u16(snapshot.status())
        .map_err(|_| ReplayError::Status(snapshot.status()))?;
    let mut builder = HttpResponse::build(status);
    for (name, value) in snapshot.headers() {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ReplayError::Header(name.clone()))?;
        let header_value =
            HeaderValue::from_bytes(value).map_err(|_| ReplayError::Header(name.clone()))?;
        builder.append_header((header_name, header_value));
    }
    if let Some(content_type) = snapshot.content_type() {
        let value = HeaderValue::from_str(content_type)
            .map_err(|_| ReplayError::Header(CONTENT_TYPE.as_str().to_owned()))?;
        builder.insert_header((CONTENT_TYPE, value));
    }
    builder.insert_header((
        HeaderName::from_static(IDEMPOTENT_REPLAY_HEADER),
        HeaderValue::from_static("true"),
    ));
    Ok(builder.body(snapshot.body().to_vec()))
}

fn capture(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Option<ResponseSnapshot> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let captured = headers
        .iter()
        .map(|(name, value)| (name.as_str().to_owned(), value.as_bytes().to_vec()));
    match ResponseSnapshot::new(status.as_u16(), content_type, captured, body.to_vec()) {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            warn!(error = %err, "response not captured for idempotent replay");
            None
        }
    }
}

/// Idempotency middleware.
///
/// # Examples
/// ```
/// use std::sync::Arc;
///
/// use actix_web::App;
/// use clinic_backend::domain::{IdempotencyConfig, IdempotencyGuard};
/// use clinic_backend::inbound::http::Idempotency;
/// use clinic_backend::outbound::coordination::InMemoryCoordinationStore;
///
/// let guard = IdempotencyGuard::new(
///     Arc::new(InMemoryCoordinationStore::new()),
///     IdempotencyConfig::default(),
/// );
/// let app = App::new().wrap(Idempotency::new(guard));
/// ```
#[derive(Clone)]
pub struct Idempotency {
    guard: Arc<IdempotencyGuard>,
}

impl Idempotency {
    /// Wrap `guard` as middleware.
    pub fn new(guard: IdempotencyGuard) -> Self {
        Self {
            guard: Arc::new(guard),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Idempotency
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = IdempotencyMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(IdempotencyMiddleware {
            service: Rc::new(service),
            guard: Arc::clone(&self.guard),
        }))
    }
}

/// Service wrapper produced by [`Idempotency`].
pub struct IdempotencyMiddleware<S> {
    service: Rc<S>,
    guard: Arc<IdempotencyGuard>,
}

impl<S, B> Service<ServiceRequest> for IdempotencyMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let guard = Arc::clone(&self.guard);
        Box::pin(async move {
            if !is_mutating(req.method()) {
                return Ok(service.call(req).await?.map_into_left_body());
            }
            let key = match extract_idempotency_key(req.headers()) {
                Ok(Some(key)) => key,
                Ok(None) => return Ok(service.call(req).await?.map_into_left_body()),
                Err(err) => {
                    let response = map_idempotency_key_error(err).error_response();
                    return Ok(req.into_response(response).map_into_right_body());
                }
            };

            match guard.lookup(&key).await {
                IdempotencyLookup::Replay(snapshot) => match replay_response(&snapshot) {
                    Ok(response) => {
                        return Ok(req.into_response(response).map_into_right_body());
                    }
                    Err(err) => {
                        warn!(
                            error = %err,
                            "stored snapshot cannot be replayed; executing handler"
                        );
                        return Ok(service.call(req).await?.map_into_left_body());
                    }
                },
                IdempotencyLookup::StoreUnavailable => {
                    return Ok(service.call(req).await?.map_into_left_body());
                }
                IdempotencyLookup::Miss => {}
            }

            let res = service.call(req).await?;
            if res.status().is_server_error() {
                debug!(status = res.status().as_u16(), "server error not cached");
                return Ok(res.map_into_left_body());
            }

            let (req, res) = res.into_parts();
            let (res, body) = res.into_parts();
            let bytes = to_bytes(body).await.map_err(|err| {
                let err: Box<dyn std::error::Error> = err.into();
                actix_web::error::ErrorInternalServerError(err.to_string())
            })?;

            if let Some(snapshot) = capture(res.status(), res.headers(), &bytes) {
                guard.remember(&key, &snapshot).await;
            }

            let res = res.set_body(BoxBody::new(bytes));
            Ok(ServiceResponse::new(req, res).map_into_right_body())
        })
    }
}
