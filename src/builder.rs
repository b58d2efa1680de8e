use crate::entry::EntryOptions;
use crate::error::BuildError;
use crate::handles::SwrCache;
use crate::metrics::Metrics;
use crate::retry::RetryPolicy;
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::shared::CacheShared;
use crate::store::CacheStore;
use crate::task::janitor::Janitor;

use core::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// A builder for creating [`SwrCache`] instances.
///
/// Defaults match a short-lived client session: values are considered stale
/// after 30 seconds, entries expire after 5 minutes, and the janitor sweeps
/// everything older than 30 minutes every 5 minutes.
pub struct SwrCacheBuilder<V: Send + Sync> {
  pub(crate) default_cache_time: Duration,
  pub(crate) default_stale_time: Duration,
  pub(crate) sweep_interval: Duration,
  pub(crate) max_entry_age: Duration,
  pub(crate) retry: RetryPolicy,
  pub(crate) dedupe: bool,
  spawner: Option<Arc<dyn TaskSpawner>>,
  #[cfg(feature = "serde")]
  persistence: Option<crate::persist::Persistence<V>>,
  _value_marker: PhantomData<V>,
}

impl<V: Send + Sync> fmt::Debug for SwrCacheBuilder<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SwrCacheBuilder")
      .field("default_cache_time", &self.default_cache_time)
      .field("default_stale_time", &self.default_stale_time)
      .field("sweep_interval", &self.sweep_interval)
      .field("max_entry_age", &self.max_entry_age)
      .field("retry", &self.retry)
      .field("dedupe", &self.dedupe)
      .finish_non_exhaustive()
  }
}

impl<V: Send + Sync> Default for SwrCacheBuilder<V> {
  fn default() -> Self {
    Self::new()
  }
}

impl<V: Send + Sync> SwrCacheBuilder<V> {
  /// Creates a new `SwrCacheBuilder` with default settings.
  pub fn new() -> Self {
    Self {
      default_cache_time: Duration::from_secs(5 * 60),
      default_stale_time: Duration::from_secs(30),
      sweep_interval: Duration::from_secs(5 * 60),
      max_entry_age: Duration::from_secs(30 * 60),
      retry: RetryPolicy::default(),
      dedupe: true,
      spawner: None,
      #[cfg(feature = "serde")]
      persistence: None,
      _value_marker: PhantomData,
    }
  }

  /// Default hard expiry applied when `set` is called without options.
  pub fn cache_time(mut self, duration: Duration) -> Self {
    self.default_cache_time = duration;
    self
  }

  /// Default soft expiry applied when `set` is called without options.
  pub fn stale_time(mut self, duration: Duration) -> Self {
    self.default_stale_time = duration;
    self
  }

  /// Sets the tick interval for the background sweep.
  /// (Primarily for testing purposes).
  pub fn sweep_interval(mut self, duration: Duration) -> Self {
    self.sweep_interval = duration;
    self
  }

  /// Sets the age ceiling past which the sweep removes entries outright.
  pub fn max_entry_age(mut self, duration: Duration) -> Self {
    self.max_entry_age = duration;
    self
  }

  /// Sets the retry policy wrapped around every fetch.
  pub fn retry(mut self, policy: RetryPolicy) -> Self {
    self.retry = policy;
    self
  }

  /// Enables or disables request deduplication (default: enabled).
  pub fn dedupe(mut self, enabled: bool) -> Self {
    self.dedupe = enabled;
    self
  }

  /// Sets the spawner used for background work. When unset, the builder
  /// captures the ambient tokio runtime.
  pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.spawner = Some(spawner);
    self
  }

  /// Validates the builder configuration.
  pub(crate) fn validate(&self) -> Result<(), BuildError> {
    if self.retry.max_attempts == 0 {
      return Err(BuildError::ZeroAttempts);
    }
    if self.sweep_interval.is_zero() {
      return Err(BuildError::ZeroSweepInterval);
    }
    Ok(())
  }
}

#[cfg(feature = "serde")]
impl<V> SwrCacheBuilder<V>
where
  V: Clone + serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
  /// Sets the durable storage backend for persisted entries.
  ///
  /// The serde bounds on `V` live here, not on `build`, so caches without
  /// persistence accept any value type.
  pub fn storage(mut self, backend: Arc<dyn crate::persist::StorageBackend>) -> Self {
    self.persistence = Some(crate::persist::Persistence::new(backend));
    self
  }
}

impl<V> SwrCacheBuilder<V>
where
  V: Send + Sync + 'static,
{
  /// Builds the cache: validates, restores the persisted snapshot (when a
  /// storage backend is configured) and spawns the janitor.
  pub fn build(self) -> Result<SwrCache<V>, BuildError> {
    self.validate()?;

    let spawner = self.resolve_spawner()?;
    let store = Arc::new(CacheStore::new());
    let metrics = Arc::new(Metrics::new());

    #[cfg(feature = "serde")]
    if let Some(persistence) = &self.persistence {
      // Restored entries that are still fresh get their staleness flips
      // rescheduled with whatever freshness window remains.
      for (key, version, remaining) in (persistence.load)(&store) {
        let store = store.clone();
        spawner.spawn(Box::pin(async move {
          tokio::time::sleep(remaining).await;
          store.mark_stale_if_version(&key, version);
        }));
      }
    }

    #[cfg(feature = "serde")]
    let on_tick = self.persistence.as_ref().map(|persistence| {
      let persistence = persistence.clone();
      let store = store.clone();
      Arc::new(move || (persistence.save)(&store)) as Arc<dyn Fn() + Send + Sync>
    });
    #[cfg(not(feature = "serde"))]
    let on_tick: Option<Arc<dyn Fn() + Send + Sync>> = None;

    let janitor = Janitor::spawn(
      store.clone(),
      metrics.clone(),
      spawner.as_ref(),
      self.sweep_interval,
      self.max_entry_age,
      on_tick,
    );

    let shared = CacheShared::new(
      self.default_options(),
      self.retry.clone(),
      self.dedupe,
      self.max_entry_age,
      spawner,
      Some(janitor),
      store,
      metrics,
      #[cfg(feature = "serde")]
      self.persistence.clone(),
    );

    Ok(SwrCache {
      shared: Arc::new(shared),
    })
  }

  fn default_options(&self) -> EntryOptions {
    EntryOptions {
      cache_time: self.default_cache_time,
      stale_time: self.default_stale_time,
      persist: false,
    }
  }

  fn resolve_spawner(&self) -> Result<Arc<dyn TaskSpawner>, BuildError> {
    match &self.spawner {
      Some(spawner) => Ok(spawner.clone()),
      None => TokioSpawner::try_current()
        .map(|s| Arc::new(s) as Arc<dyn TaskSpawner>)
        .ok_or(BuildError::SpawnerRequired),
    }
  }
}
