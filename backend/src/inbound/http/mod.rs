//! HTTP inbound adapter: reliability middleware and health probes.
//!
//! Wrap order matters. Actix applies the last `wrap` outermost, so an app
//! built as `.wrap(Idempotency).wrap(RateLimit).wrap(Trace)` traces every
//! request, meters it, and only then consults the idempotency cache.

pub mod error;
pub mod health;
pub mod idempotency;
pub mod rate_limit;
pub mod trace;

pub use error::ApiResult;
pub use idempotency::{IDEMPOTENCY_KEY_HEADER, IDEMPOTENT_REPLAY_HEADER, Idempotency};
pub use rate_limit::{RATE_LIMIT_LIMIT_HEADER, RATE_LIMIT_REMAINING_HEADER, RateLimit};
pub use trace::Trace;
