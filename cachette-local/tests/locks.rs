//! Advisory-lock tests for the local tier.

use std::time::Duration;

use cachette_backend::{CacheBackend, LockError};
use cachette_local::LocalCache;

#[tokio::test]
async fn lock_is_exclusive_until_released() {
    let cache = LocalCache::builder().build();
    assert!(cache.is_locking_supported());

    let handle = cache
        .lock("lock__job", Duration::from_secs(10), true)
        .await
        .unwrap();

    let contended = cache.lock("lock__job", Duration::from_secs(10), false).await;
    assert!(matches!(contended, Err(LockError::Unavailable { .. })));

    cache.unlock(handle).await.unwrap();
    cache
        .lock("lock__job", Duration::from_secs(10), true)
        .await
        .expect("lock must be acquirable after release");
}

#[tokio::test]
async fn waiting_acquisition_times_out_at_the_bound() {
    let cache = LocalCache::builder()
        .lock_wait(Duration::from_millis(100))
        .build();

    let _held = cache
        .lock("lock__job", Duration::from_secs(10), true)
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let error = cache
        .lock("lock__job", Duration::from_secs(10), true)
        .await
        .unwrap_err();
    assert!(matches!(error, LockError::Timeout { .. }));
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn waiter_acquires_once_the_holder_releases() {
    let cache = std::sync::Arc::new(LocalCache::builder().build());
    let handle = cache
        .lock("lock__job", Duration::from_secs(10), true)
        .await
        .unwrap();

    let waiter = {
        let cache = std::sync::Arc::clone(&cache);
        tokio::spawn(async move { cache.lock("lock__job", Duration::from_secs(10), true).await })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    cache.unlock(handle).await.unwrap();

    waiter
        .await
        .unwrap()
        .expect("waiter must acquire after release");
}

#[tokio::test]
async fn expired_locks_are_reclaimable() {
    let cache = LocalCache::builder().build();
    let stale = cache
        .lock("lock__job", Duration::from_millis(30), true)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    cache
        .lock("lock__job", Duration::from_secs(10), true)
        .await
        .expect("expired lock must not block acquisition");

    // Releasing the stale handle must not free the new holder's lock.
    cache.unlock(stale).await.unwrap();
    let contended = cache.lock("lock__job", Duration::from_secs(10), false).await;
    assert!(matches!(contended, Err(LockError::Unavailable { .. })));
}

#[tokio::test]
async fn has_lock_indexes_by_prefix_until_expiry() {
    let cache = LocalCache::builder().build();
    let _held = cache
        .lock("lock__pipeline_sub1", Duration::from_millis(50), true)
        .await
        .unwrap();

    assert!(cache.has_lock("pipeline").await.unwrap());
    assert!(!cache.has_lock("other").await.unwrap());

    tokio::time::sleep(Duration::from_millis(51)).await;
    assert!(!cache.has_lock("pipeline").await.unwrap());
}
