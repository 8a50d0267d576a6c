//! Event publisher adapters.
//!
//! No broker integration ships with the service. [`LogEventPublisher`]
//! emits each event as a structured log line, which is enough for log-based
//! pipelines and local development; [`NoOpEventPublisher`] accepts and
//! discards everything.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::domain::ports::{EventPublisher, PublishError};

/// Publishes events as structured `info` log records.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventPublisher;

#[async_trait]
impl EventPublisher for LogEventPublisher {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), PublishError> {
        info!(topic, payload = %payload, "outbox event published");
        Ok(())
    }
}

/// Accepts every event without delivering it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventPublisher;

#[async_trait]
impl EventPublisher for NoOpEventPublisher {
    async fn publish(&self, _topic: &str, _payload: &Value) -> Result<(), PublishError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[tokio::test]
    async fn bundled_publishers_always_accept() {
        let payload = json!({ "bookingId": "b-42" });
        LogEventPublisher
            .publish("booking.confirmed", &payload)
            .await
            .expect("log publisher accepts");
        NoOpEventPublisher
            .publish("booking.confirmed", &payload)
            .await
            .expect("no-op publisher accepts");
    }
}
