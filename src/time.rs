use once_cell::sync::Lazy;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

// The single, static reference point for all in-memory time calculations.
// It is initialized lazily on its first use.
static CACHE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// A helper to get the current time as a `Duration` since the epoch.
#[inline]
pub(crate) fn now_duration() -> Duration {
  Instant::now().saturating_duration_since(*CACHE_EPOCH)
}

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Only the persistence layer uses wall-clock time: a reloaded process has a
/// fresh `CACHE_EPOCH`, so epoch-relative durations cannot describe the age
/// of an entry written by a previous session.
#[inline]
pub(crate) fn now_unix_ms() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or(0)
}
