//! Reliability substrate for the clinic booking API.
//!
//! Request idempotency, fixed-window rate limiting, distributed locks over
//! shared resources and a transactional outbox, arranged as a hexagon:
//! [`domain`] holds the components and their ports, [`inbound`] the HTTP
//! middleware, and [`outbound`] the Redis, PostgreSQL and in-memory
//! adapters.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), forbid(clippy::expect_used))]

pub mod config;
pub mod domain;
pub mod inbound;
pub mod outbound;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use config::ServiceSettings;
pub use inbound::http::{Idempotency, RateLimit, Trace};
