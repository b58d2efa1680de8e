use crate::entry::EntryOptions;
use crate::error::{ErrorKind, FetchError};
use crate::loader::Fetcher;
use crate::shared::CacheShared;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// The per-subscriber view of a key's fetch lifecycle.
///
/// `is_loading` is true only for the very first fetch of a key with no
/// cached data; background refreshes set `is_validating` instead. Once any
/// data has been cached, failures surface through `error` alongside the
/// still-present `data`, never as a data-less error state.
#[derive(Debug)]
pub struct FetchState<V> {
  pub data: Option<Arc<V>>,
  pub error: Option<FetchError>,
  pub is_loading: bool,
  pub is_validating: bool,
}

impl<V> Clone for FetchState<V> {
  fn clone(&self) -> Self {
    Self {
      data: self.data.clone(),
      error: self.error.clone(),
      is_loading: self.is_loading,
      is_validating: self.is_validating,
    }
  }
}

impl<V> Default for FetchState<V> {
  fn default() -> Self {
    Self {
      data: None,
      error: None,
      is_loading: false,
      is_validating: false,
    }
  }
}

pub(crate) struct HandleInner<V: Send + Sync> {
  shared: Arc<CacheShared<V>>,
  key: String,
  fetcher: Fetcher<V>,
  options: EntryOptions,
  state_tx: watch::Sender<FetchState<V>>,
  started: AtomicBool,
  /// Revalidator registration id, 0 until started.
  registration: AtomicU64,
}

impl<V: Send + Sync + 'static> HandleInner<V> {
  /// Publishes a state transition to all subscribers.
  fn publish(&self, f: impl FnOnce(&mut FetchState<V>)) {
    self.state_tx.send_modify(f);
  }

  /// Spawns a background refresh for this key: non-blocking, never touches
  /// `is_loading`, keeps stale data on failure.
  fn spawn_background_revalidate(self: &Arc<Self>) {
    let Some(view) = self.shared.store.get(&self.key) else {
      // The entry was removed (sweep, invalidation); nothing to refresh.
      return;
    };
    if view.is_validating {
      return;
    }

    self.shared.store.set_validating(&self.key, true);
    self
      .shared
      .metrics
      .revalidations
      .fetch_add(1, Ordering::Relaxed);
    self.publish(|state| state.is_validating = true);

    let inner = self.clone();
    self.shared.spawner.spawn(Box::pin(async move {
      let outcome = inner
        .shared
        .fetch(&inner.key, &inner.fetcher, inner.options)
        .await;
      inner.apply_revalidation(outcome);
    }));
  }

  /// Applies a settled revalidation to the published state. The cache entry
  /// itself was already updated by the fetch pipeline.
  fn apply_revalidation(&self, outcome: Result<Arc<V>, FetchError>) {
    match outcome {
      Ok(data) => self.publish(|state| {
        state.data = Some(data);
        state.error = None;
        state.is_loading = false;
        state.is_validating = false;
      }),
      Err(err) if err.kind() == ErrorKind::Aborted => {
        self.shared.store.set_validating(&self.key, false);
        self.publish(|state| {
          state.is_loading = false;
          state.is_validating = false;
        });
      }
      Err(err) => self.publish(|state| {
        // Stale data is preferred over no data: `state.data` stays.
        state.error = Some(err);
        state.is_loading = false;
        state.is_validating = false;
      }),
    }
  }
}

impl<V: Send + Sync> Drop for HandleInner<V> {
  fn drop(&mut self) {
    let id = self.registration.load(Ordering::Relaxed);
    if id != 0 {
      self.shared.unregister_revalidator(&self.key, id);
    }
  }
}

/// The reactive, per-key handle application code consumes.
///
/// Construction is two-phase: [`SwrCache::handle`](crate::SwrCache::handle)
/// returns an inert handle, and [`start`](Self::start) triggers the
/// lookup-or-fetch sequence. `start` is idempotent: racing calls run the
/// sequence exactly once, and deduplication covers the fetch underneath.
pub struct SwrHandle<V: Send + Sync> {
  inner: Arc<HandleInner<V>>,
}

impl<V: Send + Sync> Clone for SwrHandle<V> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<V: Send + Sync + 'static> SwrHandle<V> {
  pub(crate) fn new(
    shared: Arc<CacheShared<V>>,
    key: String,
    fetcher: Fetcher<V>,
    options: EntryOptions,
  ) -> Self {
    let (state_tx, _) = watch::channel(FetchState::default());
    Self {
      inner: Arc::new(HandleInner {
        shared,
        key,
        fetcher,
        options,
        state_tx,
        started: AtomicBool::new(false),
        registration: AtomicU64::new(0),
      }),
    }
  }

  /// The key this handle observes.
  pub fn key(&self) -> &str {
    &self.inner.key
  }

  /// Subscribes to state transitions. The receiver's current value is the
  /// latest state; `changed()` awaits the next transition.
  pub fn subscribe(&self) -> watch::Receiver<FetchState<V>> {
    self.inner.state_tx.subscribe()
  }

  /// The latest published state.
  pub fn state(&self) -> FetchState<V> {
    self.inner.state_tx.borrow().clone()
  }

  /// Starts the handle: registers its revalidator for focus/reconnect
  /// triggers and runs the lookup-or-fetch sequence. Idempotent.
  pub fn start(&self) {
    if self.inner.started.swap(true, Ordering::SeqCst) {
      return;
    }

    // Focus/reconnect handling reaches this key through the registered
    // trigger; a weak reference keeps dropped handles collectable.
    let weak = Arc::downgrade(&self.inner);
    let id = self.inner.shared.register_revalidator(
      &self.inner.key,
      Arc::new(move || {
        if let Some(inner) = weak.upgrade() {
          inner.spawn_background_revalidate();
        }
      }),
    );
    self.inner.registration.store(id, Ordering::Relaxed);

    match self.inner.shared.store.get(&self.inner.key) {
      Some(view) => {
        // Hit: serve the cached value immediately, refresh behind it if
        // the entry has gone stale.
        let revalidate = view.is_stale && !view.is_validating;
        self.inner.publish(|state| {
          state.data = Some(view.data.clone());
          state.error = view.error.clone();
          state.is_loading = false;
        });
        if revalidate {
          self.inner.spawn_background_revalidate();
        }
      }
      None => {
        // Miss: the only path where consumers observe `is_loading`.
        self.inner.publish(|state| {
          state.is_loading = true;
          state.error = None;
        });

        let inner = self.inner.clone();
        self.inner.shared.spawner.spawn(Box::pin(async move {
          let outcome = inner
            .shared
            .fetch(&inner.key, &inner.fetcher, inner.options)
            .await;
          inner.apply_revalidation(outcome);
        }));
      }
    }
  }

  /// Forces an immediate foreground fetch, bypassing the staleness check.
  ///
  /// Any in-flight load for the key is aborted first: this call supersedes
  /// it. Resolves when the fetch settles.
  pub async fn revalidate(&self) -> Result<Arc<V>, FetchError> {
    self.inner.shared.abort(&self.inner.key);
    self.inner.shared.store.set_validating(&self.inner.key, true);
    self
      .inner
      .shared
      .metrics
      .revalidations
      .fetch_add(1, Ordering::Relaxed);
    self.inner.publish(|state| state.is_validating = true);

    let outcome = self
      .inner
      .shared
      .fetch(&self.inner.key, &self.inner.fetcher, self.inner.options)
      .await;
    self.inner.apply_revalidation(outcome.clone());
    outcome
  }

  /// Synchronously overwrites the cached value (optimistic or confirmed),
  /// clearing any error. Triggers no network call.
  pub fn mutate(&self, value: V) -> Arc<V> {
    let data = self
      .inner
      .shared
      .set(&self.inner.key, value, self.inner.options);
    let published = data.clone();
    self.inner.publish(move |state| {
      state.data = Some(published);
      state.error = None;
    });
    data
  }

  /// [`mutate`](Self::mutate) with an updater over the current value.
  /// Returning `None` leaves the cache untouched and clears the published
  /// data.
  pub fn mutate_with(&self, f: impl FnOnce(Option<&V>) -> Option<V>) -> Option<Arc<V>> {
    let current = self.inner.state_tx.borrow().data.clone();
    match f(current.as_deref()) {
      Some(value) => Some(self.mutate(value)),
      None => {
        self.inner.publish(|state| {
          state.data = None;
          state.error = None;
        });
        None
      }
    }
  }
}

/// The settled-side companion of [`SwrHandle`]: wraps an async mutation
/// (create/update/delete) and publishes its lifecycle through a watch
/// channel.
pub struct Mutation<T, Args> {
  run_fn: Arc<dyn Fn(Args) -> Pin<Box<dyn Future<Output = Result<T, FetchError>> + Send>> + Send + Sync>,
  state_tx: watch::Sender<MutationState<T>>,
}

/// Observable state of a [`Mutation`].
#[derive(Debug)]
pub struct MutationState<T> {
  pub data: Option<Arc<T>>,
  pub error: Option<FetchError>,
  pub in_flight: bool,
}

impl<T> Clone for MutationState<T> {
  fn clone(&self) -> Self {
    Self {
      data: self.data.clone(),
      error: self.error.clone(),
      in_flight: self.in_flight,
    }
  }
}

impl<T> Default for MutationState<T> {
  fn default() -> Self {
    Self {
      data: None,
      error: None,
      in_flight: false,
    }
  }
}

impl<T, Args> Mutation<T, Args>
where
  T: Send + Sync + 'static,
{
  pub fn new<F, Fut>(f: F) -> Self
  where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
  {
    let (state_tx, _) = watch::channel(MutationState::default());
    Self {
      run_fn: Arc::new(move |args| Box::pin(f(args))),
      state_tx,
    }
  }

  /// Subscribes to the mutation's lifecycle.
  pub fn subscribe(&self) -> watch::Receiver<MutationState<T>> {
    self.state_tx.subscribe()
  }

  /// Runs the mutation, publishing in-flight, settled and error states.
  pub async fn run(&self, args: Args) -> Result<Arc<T>, FetchError> {
    self.state_tx.send_modify(|state| {
      state.in_flight = true;
      state.error = None;
    });

    match (self.run_fn)(args).await {
      Ok(value) => {
        let data = Arc::new(value);
        let published = data.clone();
        self.state_tx.send_modify(move |state| {
          state.data = Some(published);
          state.error = None;
          state.in_flight = false;
        });
        Ok(data)
      }
      Err(err) => {
        let published = err.clone();
        self.state_tx.send_modify(move |state| {
          state.error = Some(published);
          state.in_flight = false;
        });
        Err(err)
      }
    }
  }

  /// Clears the mutation's published state.
  pub fn reset(&self) {
    self.state_tx.send_modify(|state| *state = MutationState::default());
  }
}
