use crate::builder::SwrCacheBuilder;
use crate::entry::{EntryOptions, EntryView};
use crate::error::FetchError;
use crate::loader::Fetcher;
use crate::metrics::{CacheStats, MetricsSnapshot};
use crate::shared::CacheShared;
use crate::subscription::SwrHandle;

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// The cache-augmented data-fetching layer.
///
/// An `SwrCache` is an explicitly constructed instance with process-wide
/// default lifetime bound to the application session; clones share the same
/// underlying store. There is no global singleton: tests build fresh
/// instances and tear them down freely.
pub struct SwrCache<V: Send + Sync> {
  pub(crate) shared: Arc<CacheShared<V>>,
}

impl<V: Send + Sync> Clone for SwrCache<V> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<V: Send + Sync> fmt::Debug for SwrCache<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SwrCache")
      .field("shared", &self.shared)
      .finish()
  }
}

impl<V> SwrCache<V>
where
  V: Send + Sync + 'static,
{
  /// Starts building a cache.
  pub fn builder() -> SwrCacheBuilder<V> {
    SwrCacheBuilder::new()
  }

  /// Retrieves the entry for a key.
  ///
  /// A stale entry is still returned: the stale-while-revalidate contract
  /// guarantees callers can always render the last good value.
  pub fn get(&self, key: &str) -> Option<EntryView<V>> {
    let view = self.shared.store.get(key);
    match &view {
      Some(_) => self.shared.metrics.hits.fetch_add(1, Ordering::Relaxed),
      None => self.shared.metrics.misses.fetch_add(1, Ordering::Relaxed),
    };
    view
  }

  /// Stores a value under a key with the cache-wide default options.
  pub fn set(&self, key: &str, value: V) -> Arc<V> {
    self.shared.set(key, value, self.shared.defaults)
  }

  /// Stores a value under a key with explicit options.
  pub fn set_with(&self, key: &str, value: V, options: EntryOptions) -> Arc<V> {
    self.shared.set(key, value, options)
  }

  /// The cache-wide default entry options, as a base for struct-update
  /// overrides at call sites.
  pub fn default_options(&self) -> EntryOptions {
    self.shared.defaults
  }

  /// Removes an entry. Returns `true` if the key was present.
  pub fn remove(&self, key: &str) -> bool {
    let removed = self.shared.store.remove(key);
    if removed {
      self
        .shared
        .metrics
        .invalidations
        .fetch_add(1, Ordering::Relaxed);
    }
    removed
  }

  /// Removes every entry whose key matches the predicate; returns how many
  /// were removed.
  pub fn invalidate_matching(&self, pred: impl Fn(&str) -> bool) -> usize {
    let victims = self.shared.store.remove_matching(pred);
    self
      .shared
      .metrics
      .invalidations
      .fetch_add(victims.len() as u64, Ordering::Relaxed);
    victims.len()
  }

  /// Empties the cache and the durable store.
  pub fn clear(&self) {
    self.shared.store.clear();
    #[cfg(feature = "serde")]
    if let Some(persistence) = &self.shared.persistence {
      persistence.backend.clear();
    }
  }

  /// Resolves a key from fresh cache, or fetches and stores it.
  ///
  /// Unlike a subscription, this is one-shot: useful for warming the cache
  /// ahead of navigation. A stale hit triggers a real fetch.
  pub async fn preload(&self, key: &str, fetcher: &Fetcher<V>) -> Result<Arc<V>, FetchError> {
    self.preload_with(key, fetcher, self.shared.defaults).await
  }

  /// [`preload`](Self::preload) with explicit entry options.
  pub async fn preload_with(
    &self,
    key: &str,
    fetcher: &Fetcher<V>,
    options: EntryOptions,
  ) -> Result<Arc<V>, FetchError> {
    if let Some(view) = self.shared.store.get(key) {
      if !view.is_stale {
        self.shared.metrics.hits.fetch_add(1, Ordering::Relaxed);
        return Ok(view.data);
      }
    }
    self.shared.fetch(key, fetcher, options).await
  }

  /// Creates a subscription handle for a key. The handle is inert until
  /// [`start`](SwrHandle::start) is called.
  pub fn handle(&self, key: impl Into<String>, fetcher: Fetcher<V>) -> SwrHandle<V> {
    SwrHandle::new(self.shared.clone(), key.into(), fetcher, self.shared.defaults)
  }

  /// [`handle`](Self::handle) with explicit entry options.
  pub fn handle_with(
    &self,
    key: impl Into<String>,
    fetcher: Fetcher<V>,
    options: EntryOptions,
  ) -> SwrHandle<V> {
    SwrHandle::new(self.shared.clone(), key.into(), fetcher, options)
  }

  /// Aborts the in-flight fetch for a key, if any. Waiters observe an
  /// aborted error and nothing is written to the cache.
  ///
  /// Callers superseding a logical request (a new search query reusing the
  /// same key space) abort the previous request before issuing the next.
  pub fn abort(&self, key: &str) -> bool {
    self.shared.abort(key)
  }

  /// Window focus regained: schedule a background refresh for every stale,
  /// not-already-validating entry with a registered revalidator.
  pub fn handle_focus(&self) {
    self.shared.handle_focus();
  }

  /// Network reconnected: schedule a background refresh for every
  /// registered key, stale or not.
  pub fn handle_reconnect(&self) {
    self.shared.handle_reconnect();
  }

  /// Serializes persist-eligible entries to the durable store, best-effort.
  ///
  /// Intended for coarse lifecycle points (shutdown, tab unload). The
  /// janitor also saves opportunistically on its own cadence.
  #[cfg(feature = "serde")]
  pub fn persist(&self) {
    if let Some(persistence) = &self.shared.persistence {
      (persistence.save)(&self.shared.store);
    }
  }

  /// Aggregate statistics about the cache's contents and counters.
  pub fn stats(&self) -> CacheStats {
    let (total_entries, stale_entries, validating_entries, persisted_entries) =
      self.shared.store.counts();
    CacheStats {
      total_entries,
      stale_entries,
      validating_entries,
      persisted_entries,
      metrics: self.shared.metrics.snapshot(),
    }
  }

  /// Counter snapshot only.
  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }
}
