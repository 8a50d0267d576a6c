//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! This module follows the hexagonal architecture pattern, providing concrete
//! implementations of domain port traits:
//!
//! - **coordination**: Redis-backed and in-memory coordination stores
//! - **persistence**: PostgreSQL outbox using Diesel ORM
//! - **outbox**: in-memory transactional outbox
//! - **publisher**: log and no-op event publishers
//! - **metrics**: Prometheus-backed metrics exporters (feature-gated)
//!
//! Adapters are thin translators that convert between domain types and
//! infrastructure-specific representations. They contain no business logic.

pub mod coordination;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod outbox;
pub mod persistence;
pub mod publisher;
