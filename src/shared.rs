use crate::entry::EntryOptions;
use crate::error::FetchError;
use crate::loader::Fetcher;
use crate::metrics::Metrics;
use crate::retry::RetryPolicy;
use crate::runtime::TaskSpawner;
use crate::store::CacheStore;
use crate::task::janitor::Janitor;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A per-key background-refresh trigger registered by a started subscription
/// handle. Focus/reconnect handling walks these instead of reaching into the
/// handles themselves.
pub(crate) struct Revalidator {
  pub(crate) id: u64,
  pub(crate) trigger: Arc<dyn Fn() + Send + Sync>,
}

/// The internal, shared core of the cache.
pub(crate) struct CacheShared<V: Send + Sync> {
  pub(crate) store: Arc<CacheStore<V>>,
  pub(crate) metrics: Arc<Metrics>,
  pub(crate) defaults: EntryOptions,
  pub(crate) retry: RetryPolicy,
  pub(crate) dedupe: bool,
  pub(crate) max_entry_age: Duration,
  pub(crate) spawner: Arc<dyn TaskSpawner>,
  pub(crate) janitor: Option<Janitor>,
  #[cfg(feature = "serde")]
  pub(crate) persistence: Option<crate::persist::Persistence<V>>,
  /// Every started handle for a key registers its own revalidator; teardown
  /// removes only that handle's registration.
  revalidators: Mutex<HashMap<String, Vec<Revalidator>, ahash::RandomState>>,
  next_registration: AtomicU64,
}

impl<V: Send + Sync> fmt::Debug for CacheShared<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheShared")
      .field("defaults", &self.defaults)
      .field("retry", &self.retry)
      .field("dedupe", &self.dedupe)
      .field("max_entry_age", &self.max_entry_age)
      .field("metrics", &self.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

impl<V: Send + Sync> Drop for CacheShared<V> {
  fn drop(&mut self) {
    if let Some(janitor) = self.janitor.take() {
      janitor.stop();
    }
  }
}

impl<V: Send + Sync + 'static> CacheShared<V> {
  #[allow(clippy::too_many_arguments)]
  pub(crate) fn new(
    defaults: EntryOptions,
    retry: RetryPolicy,
    dedupe: bool,
    max_entry_age: Duration,
    spawner: Arc<dyn TaskSpawner>,
    janitor: Option<Janitor>,
    store: Arc<CacheStore<V>>,
    metrics: Arc<Metrics>,
    #[cfg(feature = "serde")] persistence: Option<crate::persist::Persistence<V>>,
  ) -> Self {
    Self {
      store,
      metrics,
      defaults,
      retry,
      dedupe,
      max_entry_age,
      spawner,
      janitor,
      #[cfg(feature = "serde")]
      persistence,
      revalidators: Mutex::new(HashMap::default()),
      next_registration: AtomicU64::new(1),
    }
  }

  /// Stores a value and schedules its deferred staleness flip.
  ///
  /// The flip task captures the write's version; by the time it fires, a
  /// newer write makes it a no-op, so a delayed timer can never mark fresh
  /// data stale.
  pub(crate) fn set(&self, key: &str, value: V, options: EntryOptions) -> Arc<V> {
    let (version, data) = self.store.insert(key, value, options);
    self.metrics.inserts.fetch_add(1, Ordering::Relaxed);

    let store = self.store.clone();
    let key = key.to_owned();
    let stale_time = options.stale_time;
    self.spawner.spawn(Box::pin(async move {
      tokio::time::sleep(stale_time).await;
      store.mark_stale_if_version(&key, version);
    }));

    data
  }

  /// The lookup-or-fetch pipeline: deduplicate, retry, write, settle.
  ///
  /// All concurrent callers for the same key share one underlying fetch and
  /// observe the same outcome.
  pub(crate) async fn fetch(
    self: &Arc<Self>,
    key: &str,
    fetcher: &Fetcher<V>,
    options: EntryOptions,
  ) -> Result<Arc<V>, FetchError> {
    if !self.dedupe {
      return self.fetch_inline(key, fetcher, options).await;
    }

    let load = match self.store.register_pending(key) {
      Err(existing) => {
        // Someone else is already fetching this key; share their outcome.
        self.metrics.dedup_joins.fetch_add(1, Ordering::Relaxed);
        return existing.future.as_ref().await;
      }
      Ok(load) => load,
    };

    let shared = self.clone();
    let key = key.to_owned();
    let fetcher = fetcher.clone();
    let task_load = load.clone();
    self.spawner.spawn(Box::pin(async move {
      let cancelled = task_load.cancelled.clone();
      let outcome = shared
        .run_fetch(&key, &fetcher, || {
          cancelled.load(Ordering::Relaxed)
        })
        .await;

      // Taking the registration decides who settles this load: if an abort
      // got there first it already completed the future with an aborted
      // error, and this task must not write.
      if shared.store.take_pending(&key).is_none() {
        return;
      }

      let outcome = match outcome {
        Ok(value) => Ok(shared.set(&key, value, options)),
        Err(err) => {
          shared.metrics.fetch_failures.fetch_add(1, Ordering::Relaxed);
          shared.store.record_error(&key, err.clone());
          Err(err)
        }
      };

      task_load.future.complete(outcome);
    }));

    load.future.as_ref().await
  }

  /// The undeduplicated path: run the retry-wrapped fetch on the caller's
  /// own task and write through on success.
  async fn fetch_inline(
    self: &Arc<Self>,
    key: &str,
    fetcher: &Fetcher<V>,
    options: EntryOptions,
  ) -> Result<Arc<V>, FetchError> {
    match self.run_fetch(key, fetcher, || false).await {
      Ok(value) => Ok(self.set(key, value, options)),
      Err(err) => {
        self.metrics.fetch_failures.fetch_add(1, Ordering::Relaxed);
        self.store.record_error(key, err.clone());
        Err(err)
      }
    }
  }

  /// One retry-wrapped trip through the caller's fetcher.
  ///
  /// `is_cancelled` is polled before every attempt; a cancelled load yields
  /// an aborted error, which the retry policy never re-attempts.
  async fn run_fetch(
    &self,
    key: &str,
    fetcher: &Fetcher<V>,
    is_cancelled: impl Fn() -> bool,
  ) -> Result<V, FetchError> {
    use futures_util::future::{ready, Either};

    // Count retry waits on top of whatever hook the embedder installed.
    let user_hook = self.retry.on_retry.clone();
    let retry_counter = self.metrics.clone();
    let policy = self.retry.clone().on_retry(move |attempt, err| {
      retry_counter.retries.fetch_add(1, Ordering::Relaxed);
      if let Some(hook) = &user_hook {
        hook(attempt, err);
      }
    });

    let metrics = self.metrics.clone();
    policy
      .run(|| {
        if is_cancelled() {
          Either::Left(ready(Err(FetchError::aborted())))
        } else {
          metrics.fetches.fetch_add(1, Ordering::Relaxed);
          Either::Right(fetcher(key.to_owned()))
        }
      })
      .await
  }

  /// Aborts the in-flight load for a key, if any. Waiters observe an
  /// aborted error; the load task itself never writes to the cache.
  pub(crate) fn abort(&self, key: &str) -> bool {
    match self.store.take_pending(key) {
      Some(load) => {
        load.cancelled.store(true, Ordering::Relaxed);
        load.future.complete(Err(FetchError::aborted()));
        true
      }
      None => false,
    }
  }

}

// --- Revalidator registry ---
// No `'static` bound: handle teardown unregisters from `Drop`.
impl<V: Send + Sync> CacheShared<V> {
  pub(crate) fn register_revalidator(
    &self,
    key: &str,
    trigger: Arc<dyn Fn() + Send + Sync>,
  ) -> u64 {
    let id = self.next_registration.fetch_add(1, Ordering::Relaxed);
    self
      .revalidators
      .lock()
      .entry(key.to_owned())
      .or_default()
      .push(Revalidator { id, trigger });
    id
  }

  /// Removes one handle's registration; other handles for the same key stay
  /// registered.
  pub(crate) fn unregister_revalidator(&self, key: &str, id: u64) {
    let mut guard = self.revalidators.lock();
    if let Some(list) = guard.get_mut(key) {
      list.retain(|r| r.id != id);
      if list.is_empty() {
        guard.remove(key);
      }
    }
  }

  /// Focus regained: refresh every stale, not-already-validating entry in
  /// the background.
  pub(crate) fn handle_focus(&self) {
    let stale = self.store.stale_keys();
    // Triggers run after the guard is released: a trigger may drop the last
    // handle for a key, and its teardown takes this lock again.
    let triggers: Vec<Arc<dyn Fn() + Send + Sync>> = {
      let guard = self.revalidators.lock();
      stale
        .iter()
        .filter_map(|key| guard.get(key))
        .flat_map(|list| list.iter().map(|r| r.trigger.clone()))
        .collect()
    };
    for trigger in triggers {
      trigger();
    }
  }

  /// Network reconnected: refresh every registered key unconditionally.
  pub(crate) fn handle_reconnect(&self) {
    let triggers: Vec<Arc<dyn Fn() + Send + Sync>> = {
      let guard = self.revalidators.lock();
      guard
        .values()
        .flat_map(|list| list.iter().map(|r| r.trigger.clone()))
        .collect()
    };
    for trigger in triggers {
      trigger();
    }
  }
}
