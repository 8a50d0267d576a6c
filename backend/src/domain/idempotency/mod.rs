//! Idempotency primitives for safe request retries.
//!
//! This module provides types for replaying responses to retried requests:
//!
//! - [`IdempotencyKey`]: Validated opaque token sent by clients via the
//!   `Idempotency-Key` HTTP header.
//! - [`ResponseSnapshot`]: Status, headers, content type and body captured
//!   from the first handling of a key.
//! - [`IdempotencyGuard`]: Looks up and stores snapshots in the
//!   coordination store.
//! - [`IdempotencyConfig`]: Snapshot TTL.
//!
//! # Storage format
//!
//! Snapshots are stored as a compact JSON document under
//! `idmp:<sha256 of the key>`. Header values and the body are hex encoded so
//! arbitrary bytes survive the round trip.

mod config;
mod guard;
mod key;
mod snapshot;

pub use config::IdempotencyConfig;
pub use guard::{IdempotencyGuard, IdempotencyLookup, RememberOutcome};
pub use key::{IdempotencyKey, IdempotencyKeyValidationError, MAX_IDEMPOTENCY_KEY_LEN};
pub use snapshot::{FRAMING_HEADERS, ResponseSnapshot, SnapshotError, is_excluded_header};
