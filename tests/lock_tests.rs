use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use ingestd::lock::DistributedLock;
use ingestd::store::{LeaseStore, ManualClock, MemoryLeaseStore};
use ingestd::IngestdError;

fn store_at_noon() -> (Arc<MemoryLeaseStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap(),
    ));
    let store = Arc::new(MemoryLeaseStore::with_clock(clock.clone()));
    (store, clock)
}

#[tokio::test]
async fn test_concurrent_acquires_have_single_winner() {
    let store = Arc::new(MemoryLeaseStore::new());

    let mut attempts = Vec::new();
    for i in 0..10 {
        let store = store.clone();
        attempts.push(tokio::spawn(async move {
            store
                .try_acquire("ingest_30m", &format!("owner-{}", i), 120)
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for attempt in attempts {
        if attempt.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let record = store.record("ingest_30m").unwrap();
    assert!(record.owner_id.starts_with("owner-"));
}

#[tokio::test]
async fn test_expired_lease_is_acquirable_by_new_owner() {
    let (store, clock) = store_at_noon();

    assert!(store.try_acquire("lock", "owner-a", 60).await.unwrap());

    // Still live on the store clock: a different owner is rejected.
    clock.advance(Duration::seconds(30));
    assert!(!store.try_acquire("lock", "owner-b", 60).await.unwrap());

    // Past expiry the same attempt succeeds and ownership transfers.
    clock.advance(Duration::seconds(31));
    assert!(store.try_acquire("lock", "owner-b", 60).await.unwrap());
    assert_eq!(store.record("lock").unwrap().owner_id, "owner-b");
}

#[tokio::test]
async fn test_same_owner_reacquire_is_idempotent_refresh() {
    let (store, clock) = store_at_noon();

    assert!(store.try_acquire("lock", "owner-a", 60).await.unwrap());
    let first_expiry = store.record("lock").unwrap().lease_expires_at;

    // A second acquire by the holder, mid-lease, succeeds and extends.
    clock.advance(Duration::seconds(20));
    assert!(store.try_acquire("lock", "owner-a", 60).await.unwrap());
    let second_expiry = store.record("lock").unwrap().lease_expires_at;
    assert!(second_expiry > first_expiry);

    // Mutual exclusion still holds against everyone else.
    assert!(!store.try_acquire("lock", "owner-b", 60).await.unwrap());
}

#[tokio::test]
async fn test_renew_extends_only_for_current_owner() {
    let (store, clock) = store_at_noon();

    assert!(store.try_acquire("lock", "owner-a", 60).await.unwrap());
    let before = store.record("lock").unwrap().lease_expires_at;

    clock.advance(Duration::seconds(20));
    assert!(store.renew("lock", "owner-a", 60).await.unwrap());
    let after = store.record("lock").unwrap().lease_expires_at;
    assert_eq!(after - before, Duration::seconds(20));

    assert!(!store.renew("lock", "owner-b", 60).await.unwrap());
    assert_eq!(store.record("lock").unwrap().owner_id, "owner-a");
}

#[tokio::test]
async fn test_renew_after_expiry_and_reassignment_fails() {
    let (store, clock) = store_at_noon();

    assert!(store.try_acquire("lock", "owner-a", 60).await.unwrap());
    clock.advance(Duration::seconds(61));
    assert!(store.try_acquire("lock", "owner-b", 60).await.unwrap());

    // The original owner must never resurrect a reassigned lease.
    assert!(!store.renew("lock", "owner-a", 60).await.unwrap());
    assert_eq!(store.record("lock").unwrap().owner_id, "owner-b");
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let (store, _clock) = store_at_noon();

    assert!(store.try_acquire("lock", "owner-a", 60).await.unwrap());
    assert!(store.release("lock", "owner-a").await.unwrap());
    // Second release, row already gone: false, not an error.
    assert!(!store.release("lock", "owner-a").await.unwrap());
    assert!(store.record("lock").is_none());
}

#[tokio::test]
async fn test_release_by_non_owner_is_a_noop() {
    let (store, _clock) = store_at_noon();

    assert!(store.try_acquire("lock", "owner-a", 60).await.unwrap());
    assert!(!store.release("lock", "owner-b").await.unwrap());
    assert_eq!(store.record("lock").unwrap().owner_id, "owner-a");
}

#[tokio::test]
async fn test_offline_store_is_distinct_from_contention() {
    let (store, _clock) = store_at_noon();
    store.set_offline(true);

    let err = store.try_acquire("lock", "owner-a", 60).await.unwrap_err();
    assert!(matches!(err, IngestdError::StoreUnavailable(_)));
    assert!(store.renew("lock", "owner-a", 60).await.is_err());
    assert!(store.release("lock", "owner-a").await.is_err());

    // Back online: the failed calls left no row behind.
    store.set_offline(false);
    assert!(store.record("lock").is_none());
    assert!(store.try_acquire("lock", "owner-a", 60).await.unwrap());
}

#[tokio::test]
async fn test_distributed_lock_handle_lifecycle() {
    let (store, clock) = store_at_noon();
    let lock_a = DistributedLock::new(store.clone(), "owner-a".to_string());
    let lock_b = DistributedLock::new(store.clone(), "owner-b".to_string());

    let handle = lock_a.acquire("ingest_30m", 120).await.unwrap().unwrap();
    assert_eq!(handle.name, "ingest_30m");
    assert_eq!(handle.owner_id, "owner-a");
    assert_eq!(handle.lease_seconds, 120);

    // Contention is a None, not an error.
    assert!(lock_b.acquire("ingest_30m", 120).await.unwrap().is_none());

    assert!(lock_a.renew(&handle).await.unwrap());

    // Lease expires and is taken over; the stale handle renews false and
    // releases false without erroring.
    clock.advance(Duration::seconds(121));
    let stolen = lock_b.acquire("ingest_30m", 120).await.unwrap();
    assert!(stolen.is_some());
    assert!(!lock_a.renew(&handle).await.unwrap());
    assert!(!lock_a.release(&handle).await.unwrap());
    assert_eq!(store.record("ingest_30m").unwrap().owner_id, "owner-b");
}
