#![cfg(feature = "serde")]

use swr_cache::{EntryOptions, StorageBackend, StorageError, SwrCache};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Listing {
  price: u32,
}

/// An in-memory stand-in for browser local storage.
#[derive(Default)]
struct MemoryBackend {
  blob: Mutex<Option<String>>,
}

impl MemoryBackend {
  fn with_blob(blob: impl Into<String>) -> Self {
    Self {
      blob: Mutex::new(Some(blob.into())),
    }
  }

  fn blob(&self) -> Option<String> {
    self.blob.lock().clone()
  }
}

impl StorageBackend for MemoryBackend {
  fn load(&self) -> Option<String> {
    self.blob.lock().clone()
  }
  fn save(&self, blob: &str) -> Result<(), StorageError> {
    *self.blob.lock() = Some(blob.to_owned());
    Ok(())
  }
  fn clear(&self) {
    *self.blob.lock() = None;
  }
}

/// A backend that rejects every write, for quota-failure behavior.
struct ReadOnlyBackend;

impl StorageBackend for ReadOnlyBackend {
  fn load(&self) -> Option<String> {
    None
  }
  fn save(&self, _blob: &str) -> Result<(), StorageError> {
    Err(StorageError::WriteFailed("quota exceeded".into()))
  }
  fn clear(&self) {}
}

fn new_persistent_cache(backend: Arc<MemoryBackend>) -> SwrCache<Listing> {
  SwrCache::builder().storage(backend).build().unwrap()
}

fn now_unix_ms() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or(0)
}

/// Builds a snapshot blob the way the cache writes it, with a chosen age.
fn snapshot_blob(key: &str, price: u32, age: Duration) -> String {
  json!({
    "entries": [{
      "key": key,
      "value": { "price": price },
      "stored_at_ms": now_unix_ms() - age.as_millis() as u64,
      "cache_time_ms": 5 * 60 * 1000,
      "stale_time_ms": 30 * 1000,
    }]
  })
  .to_string()
}

#[tokio::test]
async fn test_round_trip_within_cache_time() {
  let backend = Arc::new(MemoryBackend::default());

  {
    let cache = new_persistent_cache(backend.clone());
    cache.set_with(
      "listing:42",
      Listing { price: 100 },
      EntryOptions {
        persist: true,
        ..cache.default_options()
      },
    );
    // Ephemeral entries never reach the snapshot.
    cache.set("session:token", Listing { price: 0 });
    cache.persist();
  }
  assert!(backend.blob().is_some());

  // A second session restores the durable entry only.
  let cache = new_persistent_cache(backend);
  let view = cache.get("listing:42").unwrap();
  assert_eq!(view.data.price, 100);
  assert!(!view.is_stale, "A young restore is served fresh");
  assert!(cache.get("session:token").is_none());
  assert_eq!(cache.stats().persisted_entries, 1);
}

#[tokio::test]
async fn test_restore_past_stale_time_is_flagged() {
  let backend = Arc::new(MemoryBackend::with_blob(snapshot_blob(
    "listing:42",
    100,
    Duration::from_secs(60),
  )));

  let cache = new_persistent_cache(backend);
  let view = cache.get("listing:42").unwrap();
  assert_eq!(view.data.price, 100);
  assert!(view.is_stale);
  assert!(!view.is_validating, "Restored entries are never mid-fetch");
}

#[tokio::test]
async fn test_restore_past_cache_time_is_discarded() {
  let backend = Arc::new(MemoryBackend::with_blob(snapshot_blob(
    "listing:42",
    100,
    Duration::from_secs(10 * 60),
  )));

  let cache = new_persistent_cache(backend);
  assert!(
    cache.get("listing:42").is_none(),
    "Entries past their hard expiry never return from disk"
  );
}

#[tokio::test]
async fn test_corrupt_blob_starts_empty() {
  let backend = Arc::new(MemoryBackend::with_blob("not json {"));

  // Decode failure degrades to an empty cache, never a panic or error.
  let cache = new_persistent_cache(backend);
  assert_eq!(cache.stats().total_entries, 0);

  cache.set("listing:42", Listing { price: 100 });
  assert_eq!(cache.get("listing:42").unwrap().data.price, 100);
}

#[tokio::test]
async fn test_write_failure_is_swallowed() {
  let cache = SwrCache::<Listing>::builder()
    .storage(Arc::new(ReadOnlyBackend))
    .build()
    .unwrap();

  cache.set_with(
    "listing:42",
    Listing { price: 100 },
    EntryOptions {
      persist: true,
      ..cache.default_options()
    },
  );

  // Persistence is best-effort: the cache keeps serving from memory.
  cache.persist();
  assert_eq!(cache.get("listing:42").unwrap().data.price, 100);
}

#[tokio::test]
async fn test_clear_empties_durable_store() {
  let backend = Arc::new(MemoryBackend::default());
  let cache = new_persistent_cache(backend.clone());

  cache.set_with(
    "listing:42",
    Listing { price: 100 },
    EntryOptions {
      persist: true,
      ..cache.default_options()
    },
  );
  cache.persist();
  assert!(backend.blob().is_some());

  cache.clear();
  assert!(backend.blob().is_none());
  assert_eq!(cache.stats().total_entries, 0);
}
