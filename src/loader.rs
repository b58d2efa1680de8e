use crate::error::FetchError;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// The internal state of a value being fetched.
pub(crate) enum State<V> {
  Fetching,
  Settled(Result<Arc<V>, FetchError>),
}

/// The internal, mutex-protected core of the `LoadFuture`.
pub(crate) struct Inner<V> {
  pub(crate) state: State<V>,
  pub(crate) waiters: VecDeque<Waker>,
}

/// A future representing one in-flight fetch for a key.
///
/// Every caller that requests the key while the fetch is pending awaits the
/// same `LoadFuture`, so all of them observe the same settlement: the same
/// resolved value or the same rejection.
pub(crate) struct LoadFuture<V> {
  pub(crate) inner: Mutex<Inner<V>>,
}

impl<V> LoadFuture<V> {
  /// Creates a new `LoadFuture` in the "Fetching" state.
  pub(crate) fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: State::Fetching,
        waiters: VecDeque::new(),
      }),
    }
  }

  /// Settles the future, waking all waiters. A second call is a no-op so an
  /// abort racing with a natural completion cannot clobber the outcome.
  pub(crate) fn complete(&self, outcome: Result<Arc<V>, FetchError>) {
    let mut inner = self.inner.lock();
    if matches!(inner.state, State::Settled(_)) {
      return;
    }
    inner.state = State::Settled(outcome);
    for waiter in inner.waiters.drain(..) {
      waiter.wake();
    }
  }
}

impl<V> Future for &LoadFuture<V> {
  type Output = Result<Arc<V>, FetchError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut inner = self.inner.lock();
    match &inner.state {
      State::Settled(outcome) => Poll::Ready(outcome.clone()),
      State::Fetching => {
        inner.waiters.push_back(cx.waker().clone());
        Poll::Pending
      }
    }
  }
}

/// The caller-supplied fetch function.
///
/// The cache does not know or constrain the transport; the fetcher receives
/// the cache key and returns the value or a classified [`FetchError`].
pub type Fetcher<V> = Arc<
  dyn Fn(String) -> Pin<Box<dyn Future<Output = Result<V, FetchError>> + Send>> + Send + Sync,
>;

/// Boxes an async closure into a [`Fetcher`].
pub fn fetcher<V, F, Fut>(f: F) -> Fetcher<V>
where
  F: Fn(String) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
{
  Arc::new(move |key| Box::pin(f(key)) as Pin<Box<dyn Future<Output = _> + Send>>)
}
