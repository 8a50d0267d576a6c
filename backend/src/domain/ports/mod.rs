//! Domain ports defining the edges of the hexagon.
//!
//! Ports describe how the coordination components expect to interact with
//! driven adapters (coordination stores, relational storage, brokers,
//! metrics exporters). Each trait exposes strongly typed errors so adapters
//! map their failures into predictable variants.

mod coordination_store;
mod event_publisher;
mod macros;
mod outbox_repository;
mod reliability_metrics;

pub(crate) use macros::define_port_error;

#[cfg(test)]
pub use coordination_store::MockCoordinationStore;
pub use coordination_store::{CoordinationStore, CoordinationStoreError};
#[cfg(test)]
pub use event_publisher::MockEventPublisher;
pub use event_publisher::{EventPublisher, PublishError};
#[cfg(test)]
pub use outbox_repository::MockOutboxRepository;
pub use outbox_repository::{OutboxAppender, OutboxRepository, OutboxRepositoryError};
#[cfg(test)]
pub use reliability_metrics::MockReliabilityMetrics;
pub use reliability_metrics::{NoOpReliabilityMetrics, ReliabilityMetrics, ReliabilityOutcome};
