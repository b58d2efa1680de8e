// This entire module is only compiled when the 'serde' feature is enabled.
#![cfg(feature = "serde")]

use crate::entry::EntryOptions;
use crate::error::StorageError;
use crate::store::CacheStore;
use crate::time;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A synchronous, string-keyed durable store for the serialized cache blob.
///
/// The contract mirrors browser-style local storage: a single opaque blob,
/// read once at startup and written wholesale at coarse lifecycle points.
/// Implementations must tolerate missing data; quota and corruption failures
/// are surfaced as [`StorageError`] and the cache swallows them.
pub trait StorageBackend: Send + Sync {
  /// Loads the previously saved blob, or `None` if nothing was saved.
  fn load(&self) -> Option<String>;
  /// Replaces the saved blob.
  fn save(&self, blob: &str) -> Result<(), StorageError>;
  /// Removes the saved blob.
  fn clear(&self);
}

/// Type-erased persistence hooks, constructed where the serde bounds on `V`
/// are available (the builder's `storage` setter) so the rest of the cache
/// stays bound-free.
pub(crate) struct Persistence<V> {
  pub(crate) backend: Arc<dyn StorageBackend>,
  pub(crate) save: Arc<dyn Fn(&CacheStore<V>) + Send + Sync>,
  pub(crate) load: Arc<dyn Fn(&CacheStore<V>) -> Vec<RestoredFlip> + Send + Sync>,
}

/// A restored entry that is still fresh and needs its staleness flip
/// rescheduled: `(key, version, remaining freshness)`.
pub(crate) type RestoredFlip = (String, u64, Duration);

impl<V> Clone for Persistence<V> {
  fn clone(&self) -> Self {
    Self {
      backend: self.backend.clone(),
      save: self.save.clone(),
      load: self.load.clone(),
    }
  }
}

impl<V> Persistence<V>
where
  V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
  pub(crate) fn new(backend: Arc<dyn StorageBackend>) -> Self {
    let save_backend = backend.clone();
    let load_backend = backend.clone();
    Self {
      backend,
      save: Arc::new(move |store| save(store, save_backend.as_ref())),
      load: Arc::new(move |store| load(store, load_backend.as_ref())),
    }
  }
}

/// An internal, serializable representation of a single cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PersistentEntry<V> {
  pub(crate) key: String,
  pub(crate) value: V,
  /// Wall-clock store time in Unix milliseconds. Epoch-relative durations do
  /// not survive a process restart, so the snapshot records wall time.
  pub(crate) stored_at_ms: u64,
  pub(crate) cache_time_ms: u64,
  pub(crate) stale_time_ms: u64,
}

/// A serializable, point-in-time snapshot of the persist-eligible entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CacheSnapshot<V> {
  pub(crate) entries: Vec<PersistentEntry<V>>,
}

impl<V> CacheStore<V>
where
  V: Clone + Serialize,
{
  /// Assembles a snapshot of every persist-eligible entry.
  pub(crate) fn to_snapshot(&self) -> CacheSnapshot<V> {
    let now_ms = time::now_unix_ms();
    let mut entries = Vec::new();

    self.for_each_persisted(|key, entry| {
      let age_ms = entry.age().as_millis() as u64;
      entries.push(PersistentEntry {
        key: key.to_owned(),
        value: entry.data.as_ref().clone(),
        stored_at_ms: now_ms.saturating_sub(age_ms),
        cache_time_ms: entry.options.cache_time.as_millis() as u64,
        stale_time_ms: entry.options.stale_time.as_millis() as u64,
      });
    });

    CacheSnapshot { entries }
  }
}

/// Serializes the persist-eligible entries to the backend as one blob.
///
/// Best-effort: failures are logged and never propagated. The cache keeps
/// operating memory-only for the session.
pub(crate) fn save<V>(store: &CacheStore<V>, backend: &dyn StorageBackend)
where
  V: Clone + Serialize,
{
  let snapshot = store.to_snapshot();
  let blob = match serde_json::to_string(&snapshot) {
    Ok(blob) => blob,
    Err(err) => {
      warn!(error = %err, "failed to serialize cache snapshot");
      return;
    }
  };

  if let Err(err) = backend.save(&blob) {
    warn!(error = %err, "failed to persist cache snapshot");
  }
}

/// Restores entries from the backend's blob into the store.
///
/// Entries whose age exceeds their recorded `cache_time` are discarded and
/// never promoted back into memory. Restored entries are marked stale when
/// their age exceeds their `stale_time`, and are never mid-validation.
///
/// Returns the still-fresh restores so the builder can reschedule their
/// staleness flips with the remaining freshness window.
pub(crate) fn load<V>(
  store: &CacheStore<V>,
  backend: &dyn StorageBackend,
) -> Vec<RestoredFlip>
where
  V: DeserializeOwned,
{
  let Some(blob) = backend.load() else {
    return Vec::new();
  };

  let snapshot: CacheSnapshot<V> = match serde_json::from_str(&blob) {
    Ok(snapshot) => snapshot,
    Err(err) => {
      warn!(error = %err, "failed to decode persisted cache, starting empty");
      return Vec::new();
    }
  };

  let now_ms = time::now_unix_ms();
  let total = snapshot.entries.len();
  let mut restored = 0usize;
  let mut flips = Vec::new();

  for p_entry in snapshot.entries {
    let age_ms = now_ms.saturating_sub(p_entry.stored_at_ms);
    if age_ms >= p_entry.cache_time_ms {
      continue;
    }

    let options = EntryOptions {
      cache_time: Duration::from_millis(p_entry.cache_time_ms),
      stale_time: Duration::from_millis(p_entry.stale_time_ms),
      persist: true,
    };
    let key = p_entry.key.clone();
    let version = store.restore(
      p_entry.key,
      p_entry.value,
      Duration::from_millis(age_ms),
      options,
    );
    if age_ms < p_entry.stale_time_ms {
      let remaining = Duration::from_millis(p_entry.stale_time_ms - age_ms);
      flips.push((key, version, remaining));
    }
    restored += 1;
  }

  debug!(restored, discarded = total - restored, "loaded persisted cache");
  flips
}
