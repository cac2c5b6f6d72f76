//! Coalescing and error-policy tests for the single-flight coordinator.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cachette::{CacheBackend, CacheValue, CacheableError, Cachette, FetchOptions};
use cachette_local::LocalCache;
use futures::future::join_all;

fn local_cache() -> Cachette<LocalCache> {
    Cachette::new(LocalCache::builder().build())
}

#[tokio::test]
async fn hundred_concurrent_callers_share_one_computation() {
    let cache = local_cache();
    cache.set("key2", &CacheValue::from("value"), 0).await;

    let invocations = Arc::new(AtomicUsize::new(0));
    let calls = (0..100).map(|_| {
        let cache = cache.clone();
        let invocations = Arc::clone(&invocations);
        async move {
            cache
                .get_or_fetch("key", 10, move || async move {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(Some(CacheValue::from("newvalue")))
                })
                .await
        }
    });

    let results = join_all(calls).await;
    assert_eq!(results.len(), 100);
    for result in results {
        assert_eq!(result.unwrap(), Some(CacheValue::from("newvalue")));
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn interleaved_keys_coalesce_independently() {
    let cache = local_cache();
    let first_count = Arc::new(AtomicUsize::new(0));
    let second_count = Arc::new(AtomicUsize::new(0));

    let calls = (0..100).map(|i| {
        let cache = cache.clone();
        let first_count = Arc::clone(&first_count);
        let second_count = Arc::clone(&second_count);
        async move {
            if i % 2 == 0 {
                cache
                    .get_or_fetch("key1", 10, move || async move {
                        first_count.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(Some(CacheValue::from("newvalue")))
                    })
                    .await
            } else {
                cache
                    .get_or_fetch("key2", 10, move || async move {
                        second_count.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(Some(CacheValue::from("newvaluebis")))
                    })
                    .await
            }
        }
    });

    let results: Vec<_> = join_all(calls)
        .await
        .into_iter()
        .map(|result| result.unwrap().unwrap())
        .collect();

    assert_eq!(first_count.load(Ordering::SeqCst), 1);
    assert_eq!(second_count.load(Ordering::SeqCst), 1);
    let first_values = results
        .iter()
        .filter(|v| **v == CacheValue::from("newvalue"))
        .count();
    let second_values = results
        .iter()
        .filter(|v| **v == CacheValue::from("newvaluebis"))
        .count();
    assert_eq!(first_values, 50);
    assert_eq!(second_values, 50);
}

#[tokio::test]
async fn errors_are_not_cached_by_default() {
    let cache = local_cache();
    let invocations = Arc::new(AtomicUsize::new(0));

    for expected in ["nope 1", "nope 2"] {
        let invocations = Arc::clone(&invocations);
        let error = cache
            .get_or_fetch("key", 10, move || async move {
                let n = invocations.fetch_add(1, Ordering::SeqCst) + 1;
                Err(CacheableError::new(format!("nope {n}")))
            })
            .await
            .unwrap_err();
        assert_eq!(error.as_compute().unwrap().message(), expected);
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cached_errors_replay_with_their_metadata() {
    let cache = local_cache();
    let invocations = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let invocations = Arc::clone(&invocations);
        let error = cache
            .get_or_fetch_with(
                "key",
                10,
                move || async move {
                    let n = invocations.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(CacheableError::new(format!("nope {n}"))
                        .with_name("UpstreamError")
                        .with_property("myStringProperty", "blah"))
                },
                FetchOptions::new().cache_all_errors(),
            )
            .await
            .unwrap_err();

        let compute = error.as_compute().unwrap();
        assert_eq!(compute.message(), "nope 1");
        assert_eq!(compute.name(), Some("UpstreamError"));
        assert_eq!(
            compute.property("myStringProperty"),
            Some(&CacheValue::from("blah"))
        );
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_waiters_observe_the_same_error() {
    let cache = local_cache();
    let invocations = Arc::new(AtomicUsize::new(0));

    let calls = (0..10).map(|_| {
        let cache = cache.clone();
        let invocations = Arc::clone(&invocations);
        async move {
            cache
                .get_or_fetch("key", 10, move || async move {
                    let n = invocations.fetch_add(1, Ordering::SeqCst) + 1;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err::<Option<CacheValue>, _>(CacheableError::new(format!("nope {n}")))
                })
                .await
        }
    });

    for result in join_all(calls).await {
        assert_eq!(result.unwrap_err().as_compute().unwrap().message(), "nope 1");
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn absent_results_are_returned_but_never_stored() {
    let cache = local_cache();
    let invocations = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let invocations = Arc::clone(&invocations);
        let result = cache
            .get_or_fetch("key", 10, move || async move {
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            })
            .await
            .unwrap();
        assert_eq!(result, None);
    }
    // Nothing was stored, so the second call computed again.
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    assert_eq!(cache.get("key").await, None);
}

#[tokio::test]
async fn plain_calls_treat_a_stored_error_as_absence() {
    let cache = local_cache();

    // An error-caching call stores the failure.
    let _ = cache
        .get_or_fetch_with(
            "key",
            10,
            || async { Err(CacheableError::new("nope")) },
            FetchOptions::new().cache_all_errors(),
        )
        .await;
    assert!(matches!(cache.get("key").await, Some(CacheValue::Error(_))));

    // A plain call on the same key ignores the error entry and computes.
    let result = cache
        .get_or_fetch("key", 10, || async { Ok(Some(CacheValue::from("fresh"))) })
        .await
        .unwrap();
    assert_eq!(result, Some(CacheValue::from("fresh")));
}

#[tokio::test]
async fn settled_fetches_leave_no_in_flight_state() {
    let cache = local_cache();

    let first = cache
        .get_or_fetch("key", 10, || async { Ok(Some(CacheValue::from("v1"))) })
        .await
        .unwrap();
    assert_eq!(first, Some(CacheValue::from("v1")));

    // A later call is served from the cache, not from a stale record.
    let second = cache
        .get_or_fetch("key", 10, || async {
            Ok(Some(CacheValue::from("never computed")))
        })
        .await
        .unwrap();
    assert_eq!(second, Some(CacheValue::from("v1")));
}

#[tokio::test]
async fn locked_fetch_releases_its_lock() {
    let cache = local_cache();

    let result = cache
        .get_or_fetch_with(
            "key",
            10,
            || async { Ok(Some(CacheValue::from("locked value"))) },
            FetchOptions::new().lock_ttl(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    assert_eq!(result, Some(CacheValue::from("locked value")));

    // The critical section is over; the advisory lock must be gone.
    assert!(!cache.backend().has_lock("key").await.unwrap());
}

#[tokio::test]
async fn second_check_skips_compute_when_the_lock_holder_stored_a_value() {
    let cache = local_cache();
    let invocations = Arc::new(AtomicUsize::new(0));

    // Simulate another process holding the lock for this key.
    let foreign = cache
        .backend()
        .lock("lock__key", Duration::from_secs(10), true)
        .await
        .unwrap();

    let fetch = {
        let cache = cache.clone();
        let invocations = Arc::clone(&invocations);
        tokio::spawn(async move {
            cache
                .get_or_fetch_with(
                    "key",
                    10,
                    move || async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        Ok(Some(CacheValue::from("computed")))
                    },
                    FetchOptions::new().lock_ttl(Duration::from_secs(5)),
                )
                .await
        })
    };

    // While our fetch waits on the lock, the "other process" stores the
    // value and releases.
    tokio::time::sleep(Duration::from_millis(50)).await;
    cache.set("key", &CacheValue::from("stored elsewhere"), 10).await;
    cache.backend().unlock(foreign).await.unwrap();

    let result = fetch.await.unwrap().unwrap();
    assert_eq!(result, Some(CacheValue::from("stored elsewhere")));
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}
