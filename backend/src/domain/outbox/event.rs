//! Outbox event records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Maximum length of an aggregate type.
pub const MAX_AGGREGATE_TYPE_LEN: usize = 100;
/// Maximum length of an aggregate id.
pub const MAX_AGGREGATE_ID_LEN: usize = 255;
/// Maximum length of an event type.
pub const MAX_EVENT_TYPE_LEN: usize = 100;

/// Unique identifier of an outbox event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxEventId(Uuid);

impl OutboxEventId {
    /// Fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID, for example one loaded from storage.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for OutboxEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Validation errors for [`NewOutboxEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutboxEventValidationError {
    /// A required field was empty or whitespace.
    #[error("{field} must not be empty")]
    EmptyField {
        /// Offending field.
        field: &'static str,
    },
    /// A field exceeded its column width.
    #[error("{field} must be at most {max} characters, got {length}")]
    FieldTooLong {
        /// Offending field.
        field: &'static str,
        /// Maximum characters.
        max: usize,
        /// Characters supplied.
        length: usize,
    },
}

fn validate_field(
    field: &'static str,
    value: &str,
    max: usize,
) -> Result<(), OutboxEventValidationError> {
    if value.trim().is_empty() {
        return Err(OutboxEventValidationError::EmptyField { field });
    }
    let length = value.chars().count();
    if length > max {
        return Err(OutboxEventValidationError::FieldTooLong { field, max, length });
    }
    Ok(())
}

/// Event to append alongside a business mutation.
///
/// ```
/// # use clinic_backend::domain::NewOutboxEvent;
/// # use serde_json::json;
/// let event = NewOutboxEvent::new("booking", "b-42", "confirmed", json!({"slot": 7}))
///     .expect("valid event");
/// assert_eq!(event.topic(), "booking.confirmed");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxEvent {
    aggregate_type: String,
    aggregate_id: String,
    event_type: String,
    payload: Value,
}

impl NewOutboxEvent {
    /// Validate and construct an event.
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Result<Self, OutboxEventValidationError> {
        let aggregate_type = aggregate_type.into();
        let aggregate_id = aggregate_id.into();
        let event_type = event_type.into();
        validate_field("aggregateType", &aggregate_type, MAX_AGGREGATE_TYPE_LEN)?;
        validate_field("aggregateId", &aggregate_id, MAX_AGGREGATE_ID_LEN)?;
        validate_field("eventType", &event_type, MAX_EVENT_TYPE_LEN)?;
        Ok(Self {
            aggregate_type,
            aggregate_id,
            event_type,
            payload,
        })
    }

    /// Aggregate type, e.g. `booking`.
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    /// Aggregate identifier.
    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    /// Event type, e.g. `confirmed`.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Opaque JSON payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Publish topic, `{aggregateType}.{eventType}`.
    pub fn topic(&self) -> String {
        format!("{}.{}", self.aggregate_type, self.event_type)
    }

    /// Materialise the stored record for this event.
    pub fn into_event(self, id: OutboxEventId, created_at: DateTime<Utc>) -> OutboxEvent {
        OutboxEvent {
            id,
            aggregate_type: self.aggregate_type,
            aggregate_id: self.aggregate_id,
            event_type: self.event_type,
            payload: self.payload,
            processed: false,
            created_at,
            processed_at: None,
        }
    }
}

/// Stored outbox event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEvent {
    /// Event identifier; consumers deduplicate on it.
    pub id: OutboxEventId,
    /// Aggregate type.
    pub aggregate_type: String,
    /// Aggregate identifier.
    pub aggregate_id: String,
    /// Event type.
    pub event_type: String,
    /// Opaque JSON payload.
    pub payload: Value,
    /// Set once by the dispatcher after a successful publish.
    pub processed: bool,
    /// Creation time; dispatch order.
    pub created_at: DateTime<Utc>,
    /// When the event was marked processed.
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// Publish topic, `{aggregateType}.{eventType}`.
    pub fn topic(&self) -> String {
        format!("{}.{}", self.aggregate_type, self.event_type)
    }
}
