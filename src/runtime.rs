use std::{future::Future, pin::Pin};

/// A trait for spawning background work (loads, stale-flip timers, the
/// janitor) onto an asynchronous runtime.
///
/// The cache performs all deferred work through this seam so embedders with
/// their own executor can supply one; by default the builder captures the
/// ambient tokio runtime.
pub trait TaskSpawner: Send + Sync + 'static {
  /// Spawns a type-erased future.
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>);
}

/// A [`TaskSpawner`] backed by a tokio runtime handle.
pub struct TokioSpawner(tokio::runtime::Handle);

impl TokioSpawner {
  /// Creates a spawner from the current tokio runtime context, or `None`
  /// when called outside of one.
  pub fn try_current() -> Option<Self> {
    tokio::runtime::Handle::try_current().ok().map(Self)
  }

  /// Creates a spawner from an explicit runtime handle.
  pub fn from_handle(handle: tokio::runtime::Handle) -> Self {
    Self(handle)
  }
}

impl TaskSpawner for TokioSpawner {
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
    self.0.spawn(future);
  }
}
