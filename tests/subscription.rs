use swr_cache::{fetcher, ErrorKind, FetchError, Fetcher, Mutation, SwrCache};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

fn counting_fetcher(fetch_count: Arc<AtomicUsize>, value: i32) -> Fetcher<i32> {
  fetcher(move |_key: String| {
    let fetch_count = fetch_count.clone();
    async move {
      fetch_count.fetch_add(1, Ordering::SeqCst);
      Ok::<i32, _>(value)
    }
  })
}

fn new_test_cache() -> SwrCache<i32> {
  SwrCache::builder()
    .stale_time(Duration::from_millis(50))
    .build()
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_cold_start_goes_through_loading() {
  let fetch_count = Arc::new(AtomicUsize::new(0));
  let cache = new_test_cache();

  let handle = cache.handle("key1", counting_fetcher(fetch_count.clone(), 10));
  let mut rx = handle.subscribe();

  // Inert until started: no state transition, no fetch.
  assert!(handle.state().data.is_none());
  assert!(!handle.state().is_loading);
  assert_eq!(fetch_count.load(Ordering::SeqCst), 0);

  handle.start();
  assert!(handle.state().is_loading, "A cold start observes is_loading");

  let state = rx.wait_for(|s| s.data.is_some()).await.unwrap().clone();
  assert_eq!(*state.data.unwrap(), 10);
  assert!(!state.is_loading);
  assert!(!state.is_validating);
  assert!(state.error.is_none());
  assert_eq!(fetch_count.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_is_idempotent() {
  let fetch_count = Arc::new(AtomicUsize::new(0));
  let cache = new_test_cache();

  let handle = cache.handle("key1", counting_fetcher(fetch_count.clone(), 10));
  let mut rx = handle.subscribe();

  handle.start();
  handle.start();
  handle.clone().start();

  rx.wait_for(|s| s.data.is_some()).await.unwrap();
  assert_eq!(
    fetch_count.load(Ordering::SeqCst),
    1,
    "Racing starts run the sequence exactly once"
  );
}

#[tokio::test(start_paused = true)]
async fn test_fresh_hit_serves_without_loading() {
  let fetch_count = Arc::new(AtomicUsize::new(0));
  let cache = new_test_cache();
  cache.set("key1", 42);

  let handle = cache.handle("key1", counting_fetcher(fetch_count.clone(), 10));
  handle.start();

  // Cached data is published synchronously; no fetch, no loading state.
  let state = handle.state();
  assert_eq!(*state.data.unwrap(), 42);
  assert!(!state.is_loading);
  assert!(!state.is_validating);

  sleep(Duration::from_millis(10)).await;
  assert_eq!(fetch_count.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stale_hit_revalidates_in_background() {
  let fetch_count = Arc::new(AtomicUsize::new(0));
  let cache = new_test_cache();
  cache.set("key1", 42);
  sleep(Duration::from_millis(60)).await;

  let handle = cache.handle("key1", counting_fetcher(fetch_count.clone(), 43));
  let mut rx = handle.subscribe();
  handle.start();

  // The stale value is published immediately, never is_loading.
  let state = handle.state();
  assert_eq!(*state.data.unwrap(), 42);
  assert!(!state.is_loading);

  // The background refresh replaces it.
  let state = rx
    .wait_for(|s| s.data.as_deref() == Some(&43))
    .await
    .unwrap()
    .clone();
  assert!(!state.is_validating);
  assert_eq!(fetch_count.load(Ordering::SeqCst), 1);
  assert_eq!(cache.metrics().revalidations, 1);
}

#[tokio::test(start_paused = true)]
async fn test_background_failure_preserves_data() {
  let cache = new_test_cache();
  cache.set("key1", 42);
  sleep(Duration::from_millis(60)).await;

  let failing = fetcher(|_key: String| async move {
    Err::<i32, _>(FetchError::http(500, "internal error"))
  });
  let handle = cache.handle("key1", failing);
  let mut rx = handle.subscribe();
  handle.start();

  let state = rx.wait_for(|s| s.error.is_some()).await.unwrap().clone();
  assert_eq!(
    state.data.as_deref(),
    Some(&42),
    "Stale data is preferred over no data"
  );
  assert_eq!(state.error.unwrap().status(), Some(500));
  assert!(!state.is_validating);

  // The cache entry keeps the last good value too.
  let view = cache.get("key1").unwrap();
  assert_eq!(*view.data, 42);
  assert!(view.error.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_cold_failure_surfaces_error_without_data() {
  let cache = new_test_cache();
  let failing = fetcher(|_key: String| async move {
    Err::<i32, _>(FetchError::http(404, "listing not found"))
  });

  let handle = cache.handle("key1", failing);
  let mut rx = handle.subscribe();
  handle.start();

  let state = rx.wait_for(|s| s.error.is_some()).await.unwrap().clone();
  assert!(state.data.is_none());
  assert!(!state.is_loading);
  assert_eq!(state.error.unwrap().status(), Some(404));
}

#[tokio::test(start_paused = true)]
async fn test_revalidate_forces_fetch_on_fresh_entry() {
  let fetch_count = Arc::new(AtomicUsize::new(0));
  let cache = new_test_cache();
  cache.set("key1", 42);

  let handle = cache.handle("key1", counting_fetcher(fetch_count.clone(), 43));
  handle.start();
  assert_eq!(fetch_count.load(Ordering::SeqCst), 0);

  // Explicit revalidation bypasses the staleness check.
  let value = handle.revalidate().await.unwrap();
  assert_eq!(*value, 43);
  assert_eq!(fetch_count.load(Ordering::SeqCst), 1);
  assert_eq!(*handle.state().data.unwrap(), 43);
}

#[tokio::test(start_paused = true)]
async fn test_abort_settles_handle_without_writing() {
  let cache = new_test_cache();
  let slow = fetcher(|_key: String| async move {
    sleep(Duration::from_secs(3600)).await;
    Ok::<i32, _>(10)
  });

  let handle = cache.handle("key1", slow);
  let mut rx = handle.subscribe();
  handle.start();
  assert!(handle.state().is_loading);

  // Let the spawned load register, then supersede it.
  tokio::task::yield_now().await;
  tokio::task::yield_now().await;
  assert!(cache.abort("key1"));

  let state = rx.wait_for(|s| !s.is_loading).await.unwrap().clone();
  assert!(state.data.is_none());
  assert!(state.error.is_none(), "An aborted load is not a failure");
  assert!(cache.get("key1").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_mutate_overwrites_synchronously() {
  let fetch_count = Arc::new(AtomicUsize::new(0));
  let cache = new_test_cache();
  cache.set("key1", 42);

  let handle = cache.handle("key1", counting_fetcher(fetch_count.clone(), 99));
  handle.start();

  // Optimistic write: published and cached, no network.
  let value = handle.mutate(43);
  assert_eq!(*value, 43);
  assert_eq!(*handle.state().data.unwrap(), 43);
  assert_eq!(*cache.get("key1").unwrap().data, 43);
  assert_eq!(fetch_count.load(Ordering::SeqCst), 0);

  // Updater form sees the current value.
  let value = handle.mutate_with(|current| current.map(|v| v + 1)).unwrap();
  assert_eq!(*value, 44);

  // A `None` from the updater clears the published data.
  assert!(handle.mutate_with(|_| None).is_none());
  assert!(handle.state().data.is_none());
}

#[tokio::test]
async fn test_mutation_lifecycle() {
  let mutation: Mutation<i32, i32> = Mutation::new(|input: i32| async move {
    if input < 0 {
      Err(FetchError::validation("negative input"))
    } else {
      Ok(input * 2)
    }
  });
  let rx = mutation.subscribe();

  assert!(!rx.borrow().in_flight);

  let value = mutation.run(21).await.unwrap();
  assert_eq!(*value, 42);
  let state = rx.borrow().clone();
  assert_eq!(state.data.as_deref(), Some(&42));
  assert!(!state.in_flight);
  assert!(state.error.is_none());

  // A failed run keeps the last data but records the error.
  let err = mutation.run(-1).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Terminal);
  let state = rx.borrow().clone();
  assert_eq!(state.data.as_deref(), Some(&42));
  assert!(state.error.is_some());

  mutation.reset();
  let state = rx.borrow().clone();
  assert!(state.data.is_none());
  assert!(state.error.is_none());
}
