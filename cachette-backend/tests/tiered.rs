//! Behavioral tests for the write-through tiered cache.

use std::sync::Arc;
use std::time::Duration;

use cachette_backend::test_util::RecordingBackend;
use cachette_backend::{BackendError, CacheBackend, DeleteStatus, LockError, TieredCache};
use cachette_core::{CacheEvent, CacheValue, EntryTtl};

fn tiered(
    local: RecordingBackend,
    remote: RecordingBackend,
) -> TieredCache<RecordingBackend, RecordingBackend> {
    let remote = Arc::new(remote);
    TieredCache::builder(local, Arc::clone(&remote), remote).build()
}

#[tokio::test]
async fn local_hit_skips_the_remote_tier() {
    let local = RecordingBackend::new();
    let remote = RecordingBackend::new();
    local.seed("k", CacheValue::from("v"), None);

    let cache = tiered(local.clone(), remote.clone());
    assert_eq!(cache.get("k").await, Some(CacheValue::from("v")));
    assert_eq!(remote.get_count(), 0);
}

#[tokio::test]
async fn remote_hit_promotes_with_the_remaining_ttl() {
    let local = RecordingBackend::new();
    let remote = RecordingBackend::new();
    // Remote entry set 100 ms ago with a 100 s TTL.
    remote.seed("k", CacheValue::from("v"), None);
    remote.reply_ttl("k", EntryTtl::Remaining(Duration::from_millis(99_900)));

    let cache = tiered(local.clone(), remote.clone());
    assert_eq!(cache.get("k").await, Some(CacheValue::from("v")));

    // The local promotion adopted the remote's remaining TTL: strictly more
    // than 99.9 s would be wrong, at most 100 s is required.
    let promoted_ttl = local
        .last_set_ttl("k")
        .expect("value must be promoted into the local tier")
        .expect("promotion must carry a TTL");
    assert!(promoted_ttl > Duration::from_secs_f64(99.8));
    assert!(promoted_ttl <= Duration::from_secs(100));
    assert_eq!(local.get("k").await, Some(CacheValue::from("v")));
}

#[tokio::test]
async fn non_expiring_remote_entries_promote_without_ttl() {
    let local = RecordingBackend::new();
    let remote = RecordingBackend::new();
    remote.seed("k", CacheValue::from("v"), None);
    remote.reply_ttl("k", EntryTtl::NonExpiring);

    let cache = tiered(local.clone(), remote);
    cache.get("k").await;
    assert_eq!(local.last_set_ttl("k"), Some(None));
}

#[tokio::test]
async fn double_miss_returns_absence() {
    let cache = tiered(RecordingBackend::new(), RecordingBackend::new());
    assert_eq!(cache.get("missing").await, None);
}

#[tokio::test]
async fn set_writes_both_tiers_with_the_same_ttl() {
    let local = RecordingBackend::new();
    let remote = RecordingBackend::new();
    let cache = tiered(local.clone(), remote.clone());

    let ttl = Some(Duration::from_secs(60));
    assert!(cache.set("k", &CacheValue::from("v"), ttl).await);
    assert_eq!(local.last_set_ttl("k"), Some(ttl));
    assert_eq!(remote.last_set_ttl("k"), Some(ttl));
}

#[tokio::test]
async fn delete_removes_from_both_tiers() {
    let local = RecordingBackend::new();
    let remote = RecordingBackend::new();
    local.seed("k", CacheValue::from("v"), None);
    remote.seed("k", CacheValue::from("v"), None);

    let cache = tiered(local.clone(), remote.clone());
    assert_eq!(cache.delete("k").await, DeleteStatus::Deleted(2));
    assert_eq!(local.get("k").await, None);
    assert_eq!(remote.get("k").await, None);
    assert_eq!(cache.delete("k").await, DeleteStatus::Missing);
}

#[tokio::test]
async fn clear_empties_both_tiers() {
    let local = RecordingBackend::new();
    let remote = RecordingBackend::new();
    local.seed("a", CacheValue::from("v"), None);
    remote.seed("a", CacheValue::from("v"), None);
    remote.seed("b", CacheValue::from("v"), None);

    let cache = tiered(local, remote);
    cache.clear().await;
    assert_eq!(cache.item_count().await, 0);
}

#[tokio::test]
async fn item_count_sums_both_tiers() {
    let local = RecordingBackend::new();
    let remote = RecordingBackend::new();
    local.seed("a", CacheValue::from("v"), None);
    remote.seed("a", CacheValue::from("v"), None);
    remote.seed("b", CacheValue::from("v"), None);

    let cache = tiered(local, remote);
    // "a" lives in both tiers and is counted twice, by contract.
    assert_eq!(cache.item_count().await, 3);
}

#[tokio::test]
async fn delete_emits_a_del_event() {
    let cache = tiered(RecordingBackend::new(), RecordingBackend::new());
    let mut events = cache.events().subscribe();

    cache.delete("gone").await;
    match events.recv().await.unwrap() {
        CacheEvent::Del { key } => assert_eq!(key, "gone"),
        other => panic!("expected a del event, got {other:?}"),
    }
}

#[tokio::test]
async fn metrics_reporter_summarizes_and_resets() {
    let local = RecordingBackend::new();
    let remote = RecordingBackend::new();
    remote.seed("remote-only", CacheValue::from("v"), None);
    local.seed("local-only", CacheValue::from("v"), None);

    let remote = Arc::new(remote);
    let cache = TieredCache::builder(local, Arc::clone(&remote), remote)
        .metrics_period(Duration::from_millis(200))
        .build();
    let mut events = cache.events().subscribe();

    cache.get("local-only").await; // local hit
    cache.get("remote-only").await; // remote hit
    cache.get("absent").await; // double miss

    let summary = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let CacheEvent::Info { message } = events.recv().await.unwrap() {
                break message;
            }
        }
    })
    .await
    .expect("the reporter must tick within its period");

    assert!(summary.contains("1 local hits"), "got: {summary}");
    assert!(summary.contains("1 remote hits"), "got: {summary}");
    assert!(summary.contains("1 misses"), "got: {summary}");
}

#[tokio::test]
async fn locking_is_not_supported() {
    let cache = tiered(RecordingBackend::new(), RecordingBackend::new());
    assert!(!cache.is_locking_supported());

    let error = cache
        .lock("lock__k", Duration::from_secs(1), true)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        LockError::Backend(BackendError::UnsupportedOperation("lock"))
    ));
    let error = cache.has_lock("k").await.unwrap_err();
    assert!(matches!(
        error,
        LockError::Backend(BackendError::UnsupportedOperation("has_lock"))
    ));
}
