use swr_cache::{fetcher, ErrorKind, FetchError, RetryPolicy, SwrCache};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

/// Fails the first `failures` calls with a transient error, then succeeds.
fn flaky_op(
  calls: Arc<AtomicUsize>,
  failures: usize,
) -> impl Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<i32, FetchError>> + Send>>
{
  move || {
    let calls = calls.clone();
    Box::pin(async move {
      let n = calls.fetch_add(1, Ordering::SeqCst);
      if n < failures {
        Err(FetchError::network("connection reset"))
      } else {
        Ok(7)
      }
    })
  }
}

#[test]
fn test_http_status_classification() {
  assert_eq!(FetchError::http(401, "").kind(), ErrorKind::Terminal);
  assert_eq!(FetchError::http(403, "").kind(), ErrorKind::Terminal);
  assert_eq!(FetchError::http(404, "").kind(), ErrorKind::Terminal);

  // Server faults and throttling remain worth retrying.
  assert!(FetchError::http(500, "").is_retryable());
  assert!(FetchError::http(429, "").is_retryable());

  assert!(!FetchError::validation("bad request").is_retryable());
  assert!(!FetchError::aborted().is_retryable());
  assert!(FetchError::timeout("deadline").is_retryable());
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retry_until_success() {
  let calls = Arc::new(AtomicUsize::new(0));
  let policy = RetryPolicy::new();

  let start = Instant::now();
  let value = policy.run(flaky_op(calls.clone(), 2)).await.unwrap();

  assert_eq!(value, 7);
  assert_eq!(calls.load(Ordering::SeqCst), 3);
  // Exponential backoff: 1s before the first retry, 2s before the second.
  assert_eq!(start.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_surfaces_last_error() {
  let calls = Arc::new(AtomicUsize::new(0));
  let policy = RetryPolicy::new().max_attempts(3);

  let err = policy.run(flaky_op(calls.clone(), usize::MAX)).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Transient);
  assert_eq!(calls.load(Ordering::SeqCst), 3, "Attempts are bounded");
}

#[tokio::test(start_paused = true)]
async fn test_terminal_error_is_not_retried() {
  let calls = Arc::new(AtomicUsize::new(0));
  let policy = RetryPolicy::new();

  let start = Instant::now();
  let err = policy
    .run(|| {
      let calls = calls.clone();
      async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err::<i32, _>(FetchError::http(404, "listing not found"))
      }
    })
    .await
    .unwrap_err();

  assert_eq!(err.status(), Some(404));
  assert_eq!(calls.load(Ordering::SeqCst), 1);
  assert_eq!(start.elapsed(), Duration::ZERO, "No retry wait for terminal errors");
}

#[tokio::test(start_paused = true)]
async fn test_constant_delay_without_backoff() {
  let calls = Arc::new(AtomicUsize::new(0));
  let policy = RetryPolicy::new().backoff(false);

  let start = Instant::now();
  policy.run(flaky_op(calls.clone(), 2)).await.unwrap();

  // Two waits at the constant initial delay.
  assert_eq!(start.elapsed(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_backoff_is_clamped_to_max_delay() {
  let calls = Arc::new(AtomicUsize::new(0));
  let policy = RetryPolicy::new()
    .max_attempts(4)
    .initial_delay(Duration::from_secs(1))
    .max_delay(Duration::from_secs(2));

  let start = Instant::now();
  policy.run(flaky_op(calls.clone(), 3)).await.unwrap();

  // 1s, then 2s, then 2s again instead of 4s.
  assert_eq!(start.elapsed(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_on_retry_hook_observes_attempts() {
  let calls = Arc::new(AtomicUsize::new(0));
  let seen: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

  let policy = RetryPolicy::new().on_retry({
    let seen = seen.clone();
    move |attempt, err| {
      assert!(err.is_retryable());
      seen.lock().push(attempt);
    }
  });

  policy.run(flaky_op(calls.clone(), 2)).await.unwrap();
  assert_eq!(*seen.lock(), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_pipeline_counts_attempts() {
  let calls = Arc::new(AtomicUsize::new(0));
  let cache = SwrCache::<i32>::builder()
    .retry(RetryPolicy::new().initial_delay(Duration::from_millis(10)))
    .build()
    .unwrap();

  let fetch = fetcher({
    let calls = calls.clone();
    move |_key: String| {
      let calls = calls.clone();
      async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err::<i32, _>(FetchError::network("offline"))
      }
    }
  });

  let err = cache.preload("key1", &fetch).await.unwrap_err();
  assert!(err.is_retryable());

  let metrics = cache.metrics();
  assert_eq!(metrics.fetches, 3);
  assert_eq!(metrics.retries, 2);
  assert_eq!(metrics.fetch_failures, 1);
  assert!(cache.get("key1").is_none(), "A failed cold fetch caches nothing");
}
