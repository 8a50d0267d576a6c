//! Ports for the transactional outbox.
//!
//! Writing and draining are split. [`OutboxAppender`] is implemented by a
//! transaction handle owned by the business collaborator, so an appended
//! event becomes durable exactly when that transaction commits.
//! [`OutboxRepository`] is the dispatcher's view of committed events.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{NewOutboxEvent, OutboxEvent, OutboxEventId};

use super::define_port_error;

define_port_error! {
    /// Errors raised by outbox adapters.
    pub enum OutboxRepositoryError {
        /// Connection could not be established or was lost.
        Connection { message: String } =>
            "outbox repository connection failed: {message}"; retryable,
        /// Query or mutation failed during execution.
        Query { message: String } => "outbox repository query failed: {message}",
        /// A stored row could not be mapped to a domain event.
        Serialization { message: String } => "outbox repository serialization failed: {message}",
    }
}

/// Dispatcher-facing access to committed outbox events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Fetch up to `limit` unprocessed events, oldest first.
    async fn fetch_unprocessed(&self, limit: usize)
    -> Result<Vec<OutboxEvent>, OutboxRepositoryError>;

    /// Flag an event as processed.
    ///
    /// Only an unprocessed event transitions; the return value reports
    /// whether this call performed the transition.
    async fn mark_processed(
        &self,
        id: &OutboxEventId,
        processed_at: DateTime<Utc>,
    ) -> Result<bool, OutboxRepositoryError>;
}

/// Append side of the outbox, bound to an open business transaction.
#[async_trait]
pub trait OutboxAppender: Send {
    /// Stage `event` in the current transaction.
    async fn append(&mut self, event: NewOutboxEvent)
    -> Result<OutboxEventId, OutboxRepositoryError>;
}
