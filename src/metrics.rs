use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector for the cache.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub(crate) struct Metrics {
  // --- Hit/Miss Ratios ---
  pub(crate) hits: CachePadded<AtomicU64>,
  pub(crate) misses: CachePadded<AtomicU64>,

  // --- Throughput ---
  pub(crate) inserts: CachePadded<AtomicU64>,
  pub(crate) invalidations: CachePadded<AtomicU64>,

  // --- Fetch Pipeline ---
  pub(crate) fetches: CachePadded<AtomicU64>,
  pub(crate) fetch_failures: CachePadded<AtomicU64>,
  pub(crate) retries: CachePadded<AtomicU64>,
  pub(crate) dedup_joins: CachePadded<AtomicU64>,
  pub(crate) revalidations: CachePadded<AtomicU64>,

  // --- Maintenance ---
  pub(crate) swept: CachePadded<AtomicU64>,

  created_at: Instant,
}

// Manual implementation of Default to handle the non-default `Instant`.
impl Default for Metrics {
  fn default() -> Self {
    Self {
      hits: CachePadded::new(AtomicU64::new(0)),
      misses: CachePadded::new(AtomicU64::new(0)),
      inserts: CachePadded::new(AtomicU64::new(0)),
      invalidations: CachePadded::new(AtomicU64::new(0)),
      fetches: CachePadded::new(AtomicU64::new(0)),
      fetch_failures: CachePadded::new(AtomicU64::new(0)),
      retries: CachePadded::new(AtomicU64::new(0)),
      dedup_joins: CachePadded::new(AtomicU64::new(0)),
      revalidations: CachePadded::new(AtomicU64::new(0)),
      swept: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let total_lookups = hits + misses;

    MetricsSnapshot {
      hits,
      misses,
      hit_ratio: if total_lookups == 0 {
        0.0
      } else {
        hits as f64 / total_lookups as f64
      },
      inserts: self.inserts.load(Ordering::Relaxed),
      invalidations: self.invalidations.load(Ordering::Relaxed),
      fetches: self.fetches.load(Ordering::Relaxed),
      fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
      retries: self.retries.load(Ordering::Relaxed),
      dedup_joins: self.dedup_joins.load(Ordering::Relaxed),
      revalidations: self.revalidations.load(Ordering::Relaxed),
      swept: self.swept.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of the cache's metrics.
#[derive(Clone)]
pub struct MetricsSnapshot {
  /// The number of lookups that found a live entry.
  pub hits: u64,
  /// The number of lookups that found nothing.
  pub misses: u64,
  /// The cache hit ratio (hits / (hits + misses)).
  pub hit_ratio: f64,
  /// The total number of values written into the cache.
  pub inserts: u64,
  /// The total number of manual invalidations.
  pub invalidations: u64,
  /// The number of underlying fetcher calls issued.
  pub fetches: u64,
  /// The number of fetches that failed after exhausting retries.
  pub fetch_failures: u64,
  /// The number of retry waits performed.
  pub retries: u64,
  /// The number of callers that joined an already in-flight fetch.
  pub dedup_joins: u64,
  /// The number of background revalidations spawned.
  pub revalidations: u64,
  /// The number of entries removed by the periodic sweep.
  pub swept: u64,
  /// The number of seconds the cache has been running.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("hits", &self.hits)
      .field("misses", &self.misses)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("inserts", &self.inserts)
      .field("invalidations", &self.invalidations)
      .field("fetches", &self.fetches)
      .field("fetch_failures", &self.fetch_failures)
      .field("retries", &self.retries)
      .field("dedup_joins", &self.dedup_joins)
      .field("revalidations", &self.revalidations)
      .field("swept", &self.swept)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}

/// Aggregate statistics about the cache's current contents, combined with a
/// [`MetricsSnapshot`].
#[derive(Debug, Clone)]
pub struct CacheStats {
  /// Total number of live entries.
  pub total_entries: usize,
  /// Entries currently marked stale.
  pub stale_entries: usize,
  /// Entries with a background refresh in flight.
  pub validating_entries: usize,
  /// Entries eligible for durable persistence.
  pub persisted_entries: usize,
  /// Counter snapshot.
  pub metrics: MetricsSnapshot,
}
