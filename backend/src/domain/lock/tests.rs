//! Unit tests for the lock manager.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use mockall::Sequence;
use rstest::{fixture, rstest};

use super::*;
use crate::domain::ErrorCode;
use crate::domain::ports::{CoordinationStoreError, MockCoordinationStore};
use crate::test_support::RecordingSleeper;

#[fixture]
fn slot() -> LockKey {
    LockKey::new("slot-7").expect("valid key")
}

fn options(max_retries: u32) -> LockOptions {
    LockOptions {
        ttl: Duration::from_secs(5),
        retry_interval: Duration::from_millis(20),
        max_retries,
    }
}

fn manager(store: MockCoordinationStore, sleeper: Arc<RecordingSleeper>) -> LockManager {
    LockManager::with_sleeper(Arc::new(store), LockOptions::default(), sleeper)
}

#[rstest]
#[case("", LockKeyValidationError::Empty)]
#[case("slot 7", LockKeyValidationError::InvalidCharacter)]
fn lock_key_rejects_invalid_names(#[case] input: &str, #[case] expected: LockKeyValidationError) {
    assert_eq!(LockKey::new(input), Err(expected));
}

#[test]
fn generated_tokens_are_unique_and_redacted() {
    let first = LockToken::generate();
    let second = LockToken::generate();
    assert_ne!(first, second);
    assert_eq!(first.as_str().len(), 32);
    assert_eq!(format!("{first:?}"), "LockToken(..)");
}

#[rstest]
#[tokio::test]
async fn acquire_stores_token_under_namespaced_key(slot: LockKey) {
    let mut store = MockCoordinationStore::new();
    store
        .expect_set_if_absent_with_expiry()
        .withf(|key, value, ttl| {
            key.to_string() == "lock:slot-7" && value.len() == 32 && *ttl == Duration::from_secs(5)
        })
        .times(1)
        .returning(|_, _, _| Ok(true));
    let sleeper = Arc::new(RecordingSleeper::default());

    let token = manager(store, sleeper.clone())
        .acquire(&slot, options(3))
        .await
        .expect("lock acquired");

    assert_eq!(token.as_str().len(), 32);
    assert!(sleeper.recorded().is_empty());
}

#[rstest]
#[tokio::test]
async fn acquire_retries_until_lock_frees(slot: LockKey) {
    let mut store = MockCoordinationStore::new();
    let mut seq = Sequence::new();
    store
        .expect_set_if_absent_with_expiry()
        .times(2)
        .in_sequence(&mut seq)
        .returning(|_, _, _| Ok(false));
    store
        .expect_set_if_absent_with_expiry()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _, _| Ok(true));
    let sleeper = Arc::new(RecordingSleeper::default());

    manager(store, sleeper.clone())
        .acquire(&slot, options(3))
        .await
        .expect("lock acquired on third attempt");

    assert_eq!(sleeper.recorded(), vec![Duration::from_millis(20); 2]);
}

#[rstest]
#[tokio::test]
async fn acquire_times_out_after_retries(slot: LockKey) {
    let mut store = MockCoordinationStore::new();
    store
        .expect_set_if_absent_with_expiry()
        .times(4)
        .returning(|_, _, _| Ok(false));
    let sleeper = Arc::new(RecordingSleeper::default());

    let err = manager(store, sleeper.clone())
        .acquire(&slot, options(3))
        .await
        .expect_err("lock stays held");

    assert_eq!(
        err,
        LockError::Timeout {
            key: "slot-7".to_owned(),
            attempts: 4
        }
    );
    assert_eq!(sleeper.recorded().len(), 3);
}

#[rstest]
#[tokio::test]
async fn acquire_fails_closed_on_store_outage(slot: LockKey) {
    let mut store = MockCoordinationStore::new();
    store
        .expect_set_if_absent_with_expiry()
        .times(1)
        .returning(|_, _, _| Err(CoordinationStoreError::unavailable("refused")));
    let sleeper = Arc::new(RecordingSleeper::default());

    let err = manager(store, sleeper.clone())
        .acquire(&slot, options(3))
        .await
        .expect_err("store outage");

    assert!(matches!(err, LockError::StoreUnavailable { .. }));
    assert!(sleeper.recorded().is_empty());
}

#[rstest]
#[tokio::test]
async fn release_deletes_only_with_matching_token(slot: LockKey) {
    let mut store = MockCoordinationStore::new();
    store
        .expect_compare_and_delete()
        .withf(|key, expected| {
            key.to_string() == "lock:slot-7" && expected.to_vec() == b"held".to_vec()
        })
        .returning(|_, _| Ok(true));
    store
        .expect_compare_and_delete()
        .withf(|_, expected| expected.to_vec() == b"stale".to_vec())
        .returning(|_, _| Ok(false));
    let manager = manager(store, Arc::new(RecordingSleeper::default()));

    let stale = LockToken::from("stale".to_owned());
    let held = LockToken::from("held".to_owned());
    assert!(!manager.release(&slot, &stale).await.expect("release"));
    assert!(manager.release(&slot, &held).await.expect("release"));
}

#[rstest]
#[tokio::test]
async fn with_lock_releases_after_error(slot: LockKey) {
    let releases = Arc::new(AtomicU32::new(0));
    let mut store = MockCoordinationStore::new();
    store
        .expect_set_if_absent_with_expiry()
        .returning(|_, _, _| Ok(true));
    let counter = releases.clone();
    store.expect_compare_and_delete().returning(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    });
    let manager = manager(store, Arc::new(RecordingSleeper::default()));

    let outcome: Result<(), Error> = manager
        .with_lock(&slot, options(0), || async {
            Err(Error::invalid_request("slot already booked"))
        })
        .await;

    assert_eq!(outcome.map_err(|err| err.code()), Err(ErrorCode::InvalidRequest));
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test]
async fn with_lock_does_not_run_section_on_timeout(slot: LockKey) {
    let mut store = MockCoordinationStore::new();
    store
        .expect_set_if_absent_with_expiry()
        .returning(|_, _, _| Ok(false));
    store.expect_compare_and_delete().never();
    let manager = manager(store, Arc::new(RecordingSleeper::default()));

    let ran = Arc::new(AtomicU32::new(0));
    let flag = ran.clone();
    let outcome: Result<(), Error> = manager
        .with_lock(&slot, options(1), || async move {
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

    let err = outcome.expect_err("lock held elsewhere");
    assert_eq!(err.code(), ErrorCode::LockTimeout);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[rstest]
#[tokio::test]
async fn dropped_guard_schedules_release(slot: LockKey) {
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let tx = std::sync::Mutex::new(Some(tx));
    let mut store = MockCoordinationStore::new();
    store
        .expect_set_if_absent_with_expiry()
        .returning(|_, _, _| Ok(true));
    store.expect_compare_and_delete().times(1).returning(move |_, _| {
        if let Some(tx) = tx.lock().expect("sender mutex").take() {
            let _ = tx.send(());
        }
        Ok(true)
    });
    let manager = manager(store, Arc::new(RecordingSleeper::default()));

    let guard = manager.lock(&slot).await.expect("lock acquired");
    drop(guard);

    tokio::time::timeout(Duration::from_secs(1), rx)
        .await
        .expect("release scheduled")
        .expect("release ran");
}

#[test]
fn lock_errors_map_to_domain_errors() {
    let timeout: Error = LockError::Timeout {
        key: "slot-7".to_owned(),
        attempts: 41,
    }
    .into();
    assert_eq!(timeout.code(), ErrorCode::LockTimeout);
    assert_eq!(
        timeout.details(),
        Some(&serde_json::json!({ "key": "slot-7", "attempts": 41 }))
    );

    let outage: Error = LockError::StoreUnavailable {
        key: "slot-7".to_owned(),
        source: CoordinationStoreError::unavailable("down"),
    }
    .into();
    assert_eq!(outage.code(), ErrorCode::ServiceUnavailable);
}
