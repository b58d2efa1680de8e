use crate::entry::{CacheEntry, EntryOptions, EntryView};
use crate::error::FetchError;
use crate::loader::LoadFuture;

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One in-flight fetch registered for a key.
///
/// `future` is shared with every deduplicated waiter. `cancelled` is the
/// cooperative abort signal: the load task checks it before each attempt and
/// before writing, so an aborted load never touches the cache and never
/// retries.
pub(crate) struct PendingLoad<V> {
  pub(crate) future: Arc<LoadFuture<V>>,
  pub(crate) cancelled: Arc<AtomicBool>,
}

impl<V> Clone for PendingLoad<V> {
  fn clone(&self) -> Self {
    Self {
      future: self.future.clone(),
      cancelled: self.cancelled.clone(),
    }
  }
}

/// The in-memory key → entry map plus the pending-load registry.
///
/// Owns no network logic. Every operation is an in-memory map mutation and
/// cannot fail. Locks are never held across an await point.
pub(crate) struct CacheStore<V> {
  entries: RwLock<HashMap<String, CacheEntry<V>, ahash::RandomState>>,
  pending: Mutex<HashMap<String, PendingLoad<V>, ahash::RandomState>>,
  /// Store-wide write counter. Versions are unique across keys so a flip
  /// scheduled against a deleted-then-recreated key can never match.
  next_version: AtomicU64,
}

impl<V> CacheStore<V> {
  pub(crate) fn new() -> Self {
    Self {
      entries: RwLock::new(HashMap::default()),
      pending: Mutex::new(HashMap::default()),
      next_version: AtomicU64::new(1),
    }
  }

  /// Pure lookup, no side effects.
  pub(crate) fn get(&self, key: &str) -> Option<EntryView<V>> {
    self.entries.read().get(key).map(|entry| entry.view())
  }

  /// Stores a value, resetting staleness, validation state and error.
  /// Returns the version assigned to the write (for the deferred stale flip)
  /// and the shared handle to the stored value.
  pub(crate) fn insert(&self, key: &str, value: V, options: EntryOptions) -> (u64, Arc<V>) {
    let version = self.next_version.fetch_add(1, Ordering::Relaxed);
    let entry = CacheEntry::new(value, version, options);
    let data = entry.data.clone();
    self.entries.write().insert(key.to_owned(), entry);
    (version, data)
  }

  /// Restores an entry from a persisted snapshot with a pre-computed age.
  pub(crate) fn restore(&self, key: String, value: V, age: Duration, options: EntryOptions) -> u64 {
    let version = self.next_version.fetch_add(1, Ordering::Relaxed);
    let entry = CacheEntry::restored(value, age, version, options);
    self.entries.write().insert(key, entry);
    version
  }

  /// Flips `is_stale` if the entry's version still matches the one captured
  /// when the flip was scheduled. A newer write wins over a delayed timer.
  pub(crate) fn mark_stale_if_version(&self, key: &str, version: u64) -> bool {
    let mut guard = self.entries.write();
    match guard.get_mut(key) {
      Some(entry) if entry.version == version => {
        entry.is_stale = true;
        true
      }
      _ => false,
    }
  }

  /// Sets the validating flag. Returns false if the key is gone.
  pub(crate) fn set_validating(&self, key: &str, validating: bool) -> bool {
    match self.entries.write().get_mut(key) {
      Some(entry) => {
        entry.is_validating = validating;
        true
      }
      None => false,
    }
  }

  /// Records a failed revalidation: keeps the data, stores the error and
  /// clears the validating flag.
  pub(crate) fn record_error(&self, key: &str, error: FetchError) {
    if let Some(entry) = self.entries.write().get_mut(key) {
      entry.error = Some(error);
      entry.is_validating = false;
    }
  }

  /// Removes an entry. Returns true if the key was present.
  pub(crate) fn remove(&self, key: &str) -> bool {
    self.entries.write().remove(key).is_some()
  }

  /// Empties the store.
  pub(crate) fn clear(&self) {
    self.entries.write().clear();
  }

  /// Removes every entry whose age exceeds `max_age`, regardless of its
  /// configured `cache_time`. Returns the number of removed entries.
  pub(crate) fn sweep(&self, max_age: Duration) -> usize {
    let mut guard = self.entries.write();
    let before = guard.len();
    guard.retain(|_, entry| entry.age() <= max_age);
    before - guard.len()
  }

  /// Removes every entry whose key matches the predicate, returning the
  /// removed keys.
  pub(crate) fn remove_matching(&self, pred: impl Fn(&str) -> bool) -> Vec<String> {
    let mut guard = self.entries.write();
    let victims: Vec<String> = guard.keys().filter(|k| pred(k)).cloned().collect();
    for key in &victims {
      guard.remove(key);
    }
    victims
  }

  /// Keys of entries that are stale and not already revalidating.
  pub(crate) fn stale_keys(&self) -> Vec<String> {
    self
      .entries
      .read()
      .iter()
      .filter(|(_, entry)| entry.is_stale && !entry.is_validating)
      .map(|(key, _)| key.clone())
      .collect()
  }

  /// Counts for [`CacheStats`](crate::metrics::CacheStats).
  pub(crate) fn counts(&self) -> (usize, usize, usize, usize) {
    let guard = self.entries.read();
    let total = guard.len();
    let stale = guard.values().filter(|e| e.is_stale).count();
    let validating = guard.values().filter(|e| e.is_validating).count();
    let persisted = guard.values().filter(|e| e.options.persist).count();
    (total, stale, validating, persisted)
  }

  /// Visits every persist-eligible entry. Used by the persistence adapter to
  /// assemble a snapshot without exposing the map.
  pub(crate) fn for_each_persisted(&self, mut f: impl FnMut(&str, &CacheEntry<V>)) {
    for (key, entry) in self.entries.read().iter() {
      if entry.options.persist {
        f(key, entry);
      }
    }
  }

  // --- Pending-load registry ---
  // The registry is deliberately method-only: callers outside the store never
  // see the map, only individual registrations.

  /// Returns the in-flight load for a key, if any.
  pub(crate) fn try_get_pending(&self, key: &str) -> Option<PendingLoad<V>> {
    self.pending.lock().get(key).cloned()
  }

  /// Registers a new in-flight load for a key, unless one already exists.
  ///
  /// Returns `Ok` with the fresh registration when this caller won the race,
  /// `Err` with the existing one otherwise. At most one load per key can be
  /// registered at any time.
  pub(crate) fn register_pending(&self, key: &str) -> Result<PendingLoad<V>, PendingLoad<V>> {
    let mut guard = self.pending.lock();
    if let Some(existing) = guard.get(key) {
      return Err(existing.clone());
    }
    let load = PendingLoad {
      future: Arc::new(LoadFuture::new()),
      cancelled: Arc::new(AtomicBool::new(false)),
    };
    guard.insert(key.to_owned(), load.clone());
    Ok(load)
  }

  /// Removes and returns the in-flight load for a key. Called on settlement
  /// (success or failure) and on abort.
  pub(crate) fn take_pending(&self, key: &str) -> Option<PendingLoad<V>> {
    self.pending.lock().remove(key)
  }
}
