use crate::metrics::Metrics;
use crate::runtime::TaskSpawner;
use crate::store::CacheStore;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// The background task responsible for the periodic sweep.
///
/// Entries older than `max_entry_age` are removed regardless of their own
/// `cache_time`. This is the hard backstop against unbounded growth when a
/// key is fetched once and never revisited.
pub(crate) struct Janitor {
  stop_flag: Arc<AtomicBool>,
}

impl Janitor {
  /// Spawns the sweep loop onto the cache's spawner.
  pub(crate) fn spawn<V>(
    store: Arc<CacheStore<V>>,
    metrics: Arc<Metrics>,
    spawner: &dyn TaskSpawner,
    tick_interval: Duration,
    max_entry_age: Duration,
    on_tick: Option<Arc<dyn Fn() + Send + Sync>>,
  ) -> Self
  where
    V: Send + Sync + 'static,
  {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_clone = stop_flag.clone();

    spawner.spawn(Box::pin(async move {
      let mut ticker = tokio::time::interval(tick_interval);
      // The first tick of a tokio interval fires immediately; skip it so a
      // freshly built cache is not swept at construction time.
      ticker.tick().await;

      loop {
        ticker.tick().await;
        if stop_clone.load(Ordering::Relaxed) {
          return;
        }

        let removed = store.sweep(max_entry_age);
        if removed > 0 {
          metrics.swept.fetch_add(removed as u64, Ordering::Relaxed);
          debug!(removed, "cache sweep removed expired entries");
        }

        // Opportunistic persistence piggybacks on the sweep cadence.
        if let Some(hook) = &on_tick {
          hook();
        }
      }
    }));

    Self { stop_flag }
  }

  /// Signals the sweep loop to exit on its next tick.
  pub(crate) fn stop(self) {
    self.stop_flag.store(true, Ordering::Relaxed);
  }
}
