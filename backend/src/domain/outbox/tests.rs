//! Unit tests for outbox events and the dispatcher.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rstest::{fixture, rstest};
use serde_json::json;

use super::*;
use crate::domain::ports::{
    MockEventPublisher, MockOutboxRepository, OutboxRepositoryError, PublishError,
};
use crate::test_support::MutableClock;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn stored(event_type: &str) -> OutboxEvent {
    NewOutboxEvent::new("booking", "b-42", event_type, json!({ "slot": 7 }))
        .expect("valid event")
        .into_event(OutboxEventId::random(), now())
}

fn dispatcher(
    repository: MockOutboxRepository,
    publisher: MockEventPublisher,
    batch_size: usize,
) -> OutboxDispatcher {
    OutboxDispatcher::new(
        Arc::new(repository),
        Arc::new(publisher),
        Arc::new(MutableClock::new(now())),
        OutboxDispatcherConfig::new(batch_size, Duration::from_secs(2)),
    )
}

// Event validation

#[rstest]
#[case("", "b-1", "confirmed", "aggregateType")]
#[case("booking", "  ", "confirmed", "aggregateId")]
#[case("booking", "b-1", "", "eventType")]
fn rejects_empty_fields(
    #[case] aggregate_type: &str,
    #[case] aggregate_id: &str,
    #[case] event_type: &str,
    #[case] field: &str,
) {
    let err = NewOutboxEvent::new(aggregate_type, aggregate_id, event_type, json!({}))
        .expect_err("empty field");
    assert!(matches!(
        err,
        OutboxEventValidationError::EmptyField { field: actual } if actual == field
    ));
}

#[test]
fn rejects_oversized_fields() {
    let long_type = "t".repeat(MAX_AGGREGATE_TYPE_LEN + 1);
    let err = NewOutboxEvent::new(long_type, "b-1", "confirmed", json!({}))
        .expect_err("aggregate type too long");
    assert_eq!(
        err,
        OutboxEventValidationError::FieldTooLong {
            field: "aggregateType",
            max: MAX_AGGREGATE_TYPE_LEN,
            length: MAX_AGGREGATE_TYPE_LEN + 1,
        }
    );

    let widest_id = "i".repeat(MAX_AGGREGATE_ID_LEN);
    assert!(NewOutboxEvent::new("booking", widest_id, "confirmed", json!({})).is_ok());
}

#[test]
fn stored_event_starts_unprocessed_and_serialises_camel_case() {
    let event = stored("confirmed");
    assert!(!event.processed);
    assert_eq!(event.processed_at, None);
    assert_eq!(event.topic(), "booking.confirmed");

    let value = serde_json::to_value(&event).expect("serialise");
    assert_eq!(value["aggregateType"], "booking");
    assert_eq!(value["eventType"], "confirmed");
    assert_eq!(value["processedAt"], serde_json::Value::Null);
}

// Dispatcher

#[fixture]
fn batch() -> Vec<OutboxEvent> {
    vec![stored("confirmed"), stored("cancelled")]
}

#[rstest]
#[tokio::test]
async fn publishes_and_marks_each_event(batch: Vec<OutboxEvent>) {
    let ids: Vec<_> = batch.iter().map(|event| event.id).collect();
    let mut repository = MockOutboxRepository::new();
    let rows = batch.clone();
    repository
        .expect_fetch_unprocessed()
        .withf(|limit| *limit == 10)
        .times(1)
        .return_once(move |_| Ok(rows));
    repository
        .expect_mark_processed()
        .withf(move |id, at| ids.contains(id) && *at == now())
        .times(2)
        .returning(|_, _| Ok(true));
    let mut publisher = MockEventPublisher::new();
    publisher
        .expect_publish()
        .withf(|topic, payload| {
            (topic.to_string() == "booking.confirmed" || topic.to_string() == "booking.cancelled")
                && *payload == json!({ "slot": 7 })
        })
        .times(2)
        .returning(|_, _| Ok(()));

    let report = dispatcher(repository, publisher, 10)
        .run_once()
        .await
        .expect("cycle runs");

    assert_eq!(
        report,
        DispatchReport {
            fetched: 2,
            published: 2,
            failed: 0
        }
    );
}

#[rstest]
#[tokio::test]
async fn failed_publish_leaves_event_pending(batch: Vec<OutboxEvent>) {
    let confirmed = batch[0].id;
    let mut repository = MockOutboxRepository::new();
    repository
        .expect_fetch_unprocessed()
        .return_once(move |_| Ok(batch));
    repository
        .expect_mark_processed()
        .withf(move |id, _| *id == confirmed)
        .times(1)
        .returning(|_, _| Ok(true));
    let mut publisher = MockEventPublisher::new();
    publisher
        .expect_publish()
        .withf(|topic, _| topic.to_string() == "booking.confirmed")
        .returning(|_, _| Ok(()));
    publisher
        .expect_publish()
        .withf(|topic, _| topic.to_string() == "booking.cancelled")
        .returning(|_, _| Err(PublishError::unavailable("broker down")));

    let report = dispatcher(repository, publisher, 10)
        .run_once()
        .await
        .expect("cycle runs");

    assert_eq!(report.published, 1);
    assert_eq!(report.failed, 1);
}

#[rstest]
#[tokio::test]
async fn mark_failure_counts_as_pending(batch: Vec<OutboxEvent>) {
    let mut repository = MockOutboxRepository::new();
    repository
        .expect_fetch_unprocessed()
        .return_once(move |_| Ok(batch));
    repository
        .expect_mark_processed()
        .returning(|_, _| Err(OutboxRepositoryError::connection("reset")));
    let mut publisher = MockEventPublisher::new();
    publisher.expect_publish().returning(|_, _| Ok(()));

    let report = dispatcher(repository, publisher, 10)
        .run_once()
        .await
        .expect("cycle runs");

    assert_eq!(report.failed, 2);
    assert_eq!(report.published, 0);
}

#[tokio::test]
async fn fetch_failure_is_returned() {
    let mut repository = MockOutboxRepository::new();
    repository
        .expect_fetch_unprocessed()
        .returning(|_| Err(OutboxRepositoryError::query("relation missing")));
    let mut publisher = MockEventPublisher::new();
    publisher.expect_publish().never();

    let err = dispatcher(repository, publisher, 10)
        .run_once()
        .await
        .expect_err("fetch fails");
    assert!(matches!(err, OutboxRepositoryError::Query { .. }));
}

#[tokio::test(start_paused = true)]
async fn idle_dispatcher_polls_at_interval_and_stops_on_signal() {
    let polls = Arc::new(AtomicUsize::new(0));
    let counter = polls.clone();
    let mut repository = MockOutboxRepository::new();
    repository.expect_fetch_unprocessed().returning(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    });
    let publisher = MockEventPublisher::new();

    let handle = dispatcher(repository, publisher, 10).spawn();
    tokio::time::sleep(Duration::from_millis(5_500)).await;
    handle.shutdown().await;

    // Polls at t=0, 2s and 4s.
    assert_eq!(polls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn full_productive_batch_repolls_without_sleeping() {
    let polls = Arc::new(AtomicUsize::new(0));
    let counter = polls.clone();
    let mut repository = MockOutboxRepository::new();
    repository.expect_fetch_unprocessed().returning(move |_| {
        let poll = counter.fetch_add(1, Ordering::SeqCst);
        if poll == 0 {
            Ok(vec![stored("confirmed")])
        } else {
            Ok(Vec::new())
        }
    });
    repository
        .expect_mark_processed()
        .returning(|_, _| Ok(true));
    let mut publisher = MockEventPublisher::new();
    publisher.expect_publish().returning(|_, _| Ok(()));

    let handle = dispatcher(repository, publisher, 1).spawn();
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    handle.shutdown().await;

    // The full first batch triggers an immediate second poll, which is empty.
    assert_eq!(polls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn failing_full_batch_waits_for_poll_interval() {
    let polls = Arc::new(AtomicUsize::new(0));
    let counter = polls.clone();
    let mut repository = MockOutboxRepository::new();
    repository.expect_fetch_unprocessed().returning(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(vec![stored("confirmed")])
    });
    let mut publisher = MockEventPublisher::new();
    publisher
        .expect_publish()
        .returning(|_, _| Err(PublishError::rejected("schema mismatch")));

    let handle = dispatcher(repository, publisher, 1).spawn();
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    handle.shutdown().await;

    assert_eq!(polls.load(Ordering::SeqCst), 1);
}
