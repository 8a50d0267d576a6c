//! Port describing delivery of outbox events to downstream consumers.
use async_trait::async_trait;
use serde_json::Value;

use super::define_port_error;

define_port_error! {
    /// Errors surfaced by publisher adapters.
    pub enum PublishError {
        /// The broker or sink is unreachable.
        Unavailable { message: String } => "event publisher is unavailable: {message}"; retryable,
        /// The broker refused the message.
        Rejected { message: String } => "event was rejected: {message}",
    }
}

/// Delivers an event payload to a topic.
///
/// Delivery is at-least-once: the dispatcher may hand the same event to the
/// publisher more than once, so downstream consumers must tolerate repeats.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish `payload` to `topic`.
    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), PublishError>;
}
