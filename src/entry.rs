use crate::error::FetchError;
use crate::time;

use std::sync::Arc;
use std::time::Duration;

/// Per-entry storage options, resolved against the cache-wide defaults at
/// `set` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryOptions {
  /// Hard expiry: an entry older than this is never served from a persisted
  /// snapshot and is eligible for the janitor's sweep.
  pub cache_time: Duration,
  /// Soft expiry: once elapsed the entry is marked refresh-eligible without
  /// discarding its data.
  pub stale_time: Duration,
  /// Whether this entry is included in the persisted snapshot.
  pub persist: bool,
}

/// A container for a value in the cache, holding all necessary metadata.
#[derive(Debug)]
pub(crate) struct CacheEntry<V> {
  /// The user's value, wrapped in an Arc for shared ownership.
  pub(crate) data: Arc<V>,
  /// When this value was stored, relative to the cache epoch.
  pub(crate) stored_at: Duration,
  /// Monotonic write counter for this key. Deferred staleness flips capture
  /// the version at schedule time and apply only if it still matches.
  pub(crate) version: u64,
  /// Refresh-eligible. Stale entries keep their data.
  pub(crate) is_stale: bool,
  /// A background refresh for this key is in flight.
  pub(crate) is_validating: bool,
  /// The last failure observed for this key, cleared on success.
  pub(crate) error: Option<FetchError>,
  /// The options this entry was stored with.
  pub(crate) options: EntryOptions,
}

impl<V> CacheEntry<V> {
  /// Creates a fresh entry for a successful write.
  pub(crate) fn new(data: V, version: u64, options: EntryOptions) -> Self {
    Self {
      data: Arc::new(data),
      stored_at: time::now_duration(),
      version,
      is_stale: false,
      is_validating: false,
      error: None,
      options,
    }
  }

  /// Creates an entry restored from a persisted snapshot.
  ///
  /// The restored age decides staleness; a restored entry is never mid-fetch.
  pub(crate) fn restored(data: V, age: Duration, version: u64, options: EntryOptions) -> Self {
    Self {
      data: Arc::new(data),
      stored_at: time::now_duration().saturating_sub(age),
      version,
      // Inclusive: an entry that has lived out its full stale window is
      // refresh-eligible, matching the deferred flip firing at stale_time.
      is_stale: age >= options.stale_time,
      is_validating: false,
      error: None,
      options,
    }
  }

  /// The age of this entry.
  #[inline]
  pub(crate) fn age(&self) -> Duration {
    time::now_duration().saturating_sub(self.stored_at)
  }

  /// Builds the public read-only view of this entry.
  pub(crate) fn view(&self) -> EntryView<V> {
    EntryView {
      data: self.data.clone(),
      is_stale: self.is_stale,
      is_validating: self.is_validating,
      error: self.error.clone(),
      age: self.age(),
    }
  }
}

/// A point-in-time, read-only view of a cached entry.
#[derive(Debug, Clone)]
pub struct EntryView<V> {
  /// The last successfully fetched value. Present even when stale: callers
  /// can always render the last good value while revalidation proceeds.
  pub data: Arc<V>,
  /// The entry has outlived its `stale_time` and is refresh-eligible.
  pub is_stale: bool,
  /// A background refresh is in flight.
  pub is_validating: bool,
  /// The last failure observed for this key, if any.
  pub error: Option<FetchError>,
  /// Time since the value was stored.
  pub age: Duration,
}
