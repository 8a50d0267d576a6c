//! Transactional outbox.
//!
//! Business collaborators append a [`NewOutboxEvent`] through an
//! [`OutboxAppender`](crate::domain::ports::OutboxAppender) bound to the same
//! transaction as the state change it announces. The [`OutboxDispatcher`]
//! later drains committed events to an
//! [`EventPublisher`](crate::domain::ports::EventPublisher).
//!
//! ```text
//! Created --publish ok--> Processed (terminal)
//! Created --publish fails--> Created
//! ```

mod dispatcher;
mod event;

pub use dispatcher::{DispatchReport, DispatcherHandle, OutboxDispatcher, OutboxDispatcherConfig};
pub use event::{
    MAX_AGGREGATE_ID_LEN, MAX_AGGREGATE_TYPE_LEN, MAX_EVENT_TYPE_LEN, NewOutboxEvent,
    OutboxEvent, OutboxEventId, OutboxEventValidationError,
};

#[cfg(test)]
mod tests;
