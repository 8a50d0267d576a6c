//! Domain primitives and coordination components.
//!
//! Purpose: Define the reliability substrate shared by the booking API's
//! request path and background work. Components talk to shared state only
//! through the ports in [`ports`]; adapters live under `outbound`.
//!
//! Public surface:
//! - Error (alias to `error::Error`): transport-agnostic error payload.
//! - ErrorCode (alias to `error::ErrorCode`): stable error identifier.
//! - IdempotencyGuard: response cache and replay keyed by `Idempotency-Key`.
//! - RateLimiter: fixed-window admission control per client identity.
//! - LockManager: distributed mutual exclusion with scoped release.
//! - OutboxDispatcher: background drain of the transactional outbox.
//! - TraceId: request correlation identifier in task-local storage.

pub mod error;
pub mod idempotency;
mod identity;
mod lock;
pub mod outbox;
pub mod ports;
mod rate_limit;
mod runtime;
mod trace_id;

pub use self::error::{Error, ErrorCode, ErrorValidationError};
pub use self::idempotency::{
    IdempotencyConfig, IdempotencyGuard, IdempotencyKey, IdempotencyLookup, RememberOutcome,
    ResponseSnapshot,
};
pub use self::identity::{ClientIdentity, ClientIdentityValidationError};
pub use self::lock::{
    LockError, LockGuard, LockKey, LockKeyValidationError, LockManager, LockOptions, LockToken,
};
pub use self::outbox::{
    DispatchReport, DispatcherHandle, NewOutboxEvent, OutboxDispatcher, OutboxDispatcherConfig,
    OutboxEvent, OutboxEventId, OutboxEventValidationError,
};
pub use self::rate_limit::{AdmissionDecision, RateLimitConfig, RateLimiter, RateQuota};
pub use self::runtime::{Sleeper, TokioSleeper};
pub use self::trace_id::{TRACE_ID_HEADER, TraceId};

/// Convenient API result alias.
///
/// # Examples
/// ```
/// use actix_web::HttpResponse;
/// use clinic_backend::domain::{ApiResult, Error};
///
/// fn handler() -> ApiResult<HttpResponse> {
///     Err(Error::lock_timeout("slot is being booked"))
/// }
/// ```
pub type ApiResult<T> = Result<T, Error>;
