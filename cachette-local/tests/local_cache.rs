//! Behavioral tests for the local tier.

use std::time::Duration;

use cachette_backend::{CacheBackend, DeleteStatus};
use cachette_core::{CacheValue, EntryTtl};
use cachette_local::LocalCache;

#[tokio::test]
async fn set_then_get_round_trips() {
    let cache = LocalCache::builder().build();
    assert!(cache.set("k", &CacheValue::from("v"), None).await);
    assert_eq!(cache.get("k").await, Some(CacheValue::from("v")));
}

#[tokio::test]
async fn structured_values_are_stored_as_is() {
    let cache = LocalCache::builder().build();
    let value = CacheValue::record([("nested", CacheValue::set([1i64, 2]))]);
    cache.set("k", &value, None).await;
    assert_eq!(cache.get("k").await, Some(value));
}

#[tokio::test]
async fn entries_expire_strictly_after_their_ttl() {
    let cache = LocalCache::builder().build();
    cache
        .set("k", &CacheValue::from("v"), Some(Duration::from_millis(50)))
        .await;
    assert_eq!(cache.get("k").await, Some(CacheValue::from("v")));

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(cache.get("k").await, None);
    assert_eq!(cache.get_ttl("k").await, EntryTtl::Missing);
}

#[tokio::test]
async fn get_ttl_reports_remaining_milliseconds() {
    let cache = LocalCache::builder().build();
    cache
        .set("k", &CacheValue::from("v"), Some(Duration::from_secs(10)))
        .await;

    match cache.get_ttl("k").await {
        EntryTtl::Remaining(remaining) => {
            assert!(remaining <= Duration::from_secs(10));
            assert!(remaining > Duration::from_secs(9));
        }
        other => panic!("expected remaining TTL, got {other:?}"),
    }
}

#[tokio::test]
async fn entries_without_ttl_report_non_expiring() {
    let cache = LocalCache::builder().build();
    cache.set("k", &CacheValue::from("v"), None).await;
    assert_eq!(cache.get_ttl("k").await, EntryTtl::NonExpiring);
    assert_eq!(cache.get_ttl("absent").await, EntryTtl::Missing);
}

#[tokio::test]
async fn rewriting_an_entry_refreshes_its_ttl() {
    let cache = LocalCache::builder().build();
    cache
        .set("k", &CacheValue::from("v1"), Some(Duration::from_millis(50)))
        .await;
    cache
        .set("k", &CacheValue::from("v2"), Some(Duration::from_secs(10)))
        .await;

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(cache.get("k").await, Some(CacheValue::from("v2")));
}

#[tokio::test]
async fn delete_and_clear_remove_entries() {
    let cache = LocalCache::builder().build();
    cache.set("a", &CacheValue::from("v"), None).await;
    cache.set("b", &CacheValue::from("v"), None).await;

    assert_eq!(cache.delete("a").await, DeleteStatus::Deleted(1));
    assert_eq!(cache.delete("a").await, DeleteStatus::Missing);

    cache.clear().await;
    assert_eq!(cache.item_count().await, 0);
    assert_eq!(cache.get("b").await, None);
}

#[tokio::test]
async fn clear_memory_is_identical_to_clear() {
    let cache = LocalCache::builder().build();
    cache.set("a", &CacheValue::from("v"), None).await;
    cache.clear_memory().await;
    assert_eq!(cache.item_count().await, 0);
}

#[tokio::test]
async fn capacity_bound_is_respected() {
    let cache = LocalCache::builder().max_items(3).build();
    for i in 0..10 {
        cache
            .set(&format!("k{i}"), &CacheValue::from("v"), None)
            .await;
    }
    assert!(cache.item_count().await <= 3);
}
