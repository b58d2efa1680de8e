use std::fmt;

/// Classifies a fetch failure for the retry policy.
///
/// The fetcher (or the adapter translating a backend's error shapes) assigns
/// the kind explicitly; the cache never inspects messages or status strings
/// to guess whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// The request can never succeed as issued (auth failures, missing
  /// resources, validation errors). Surfaced immediately, never retried.
  Terminal,
  /// The request may succeed if repeated (server errors, network faults,
  /// timeouts). Retried with backoff before being surfaced.
  Transient,
  /// The request was superseded and cancelled by the caller. Never retried
  /// and never written to the cache.
  Aborted,
}

/// An error produced by a fetcher or by the fetch pipeline around it.
///
/// `FetchError` is `Clone` so that every caller sharing a deduplicated
/// request observes the same rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
  kind: ErrorKind,
  /// HTTP status, when the failure carries one.
  status: Option<u16>,
  message: String,
}

impl FetchError {
  /// Creates an error with an explicit kind.
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      status: None,
      message: message.into(),
    }
  }

  /// Creates an error from an HTTP status code, classifying it.
  ///
  /// 401, 403 and 404 are terminal. Everything else, including 5xx and 429,
  /// is transient and eligible for retry.
  pub fn http(status: u16, message: impl Into<String>) -> Self {
    let kind = match status {
      401 | 403 | 404 => ErrorKind::Terminal,
      _ => ErrorKind::Transient,
    };
    Self {
      kind,
      status: Some(status),
      message: message.into(),
    }
  }

  /// A network-level failure (connection refused, DNS, offline).
  pub fn network(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Transient, message)
  }

  /// A request that exceeded its deadline.
  pub fn timeout(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Transient, message)
  }

  /// A validation failure in the request itself.
  pub fn validation(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Terminal, message)
  }

  /// The error observed by waiters of a load that was aborted because a
  /// newer request superseded it.
  pub fn aborted() -> Self {
    Self::new(ErrorKind::Aborted, "request aborted")
  }

  pub fn kind(&self) -> ErrorKind {
    self.kind
  }

  pub fn status(&self) -> Option<u16> {
    self.status
  }

  pub fn message(&self) -> &str {
    &self.message
  }

  /// Whether the retry policy may re-attempt after this failure.
  pub fn is_retryable(&self) -> bool {
    self.kind == ErrorKind::Transient
  }
}

impl fmt::Display for FetchError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.status {
      Some(status) => write!(f, "fetch failed (http {}): {}", status, self.message),
      None => write!(f, "fetch failed: {}", self.message),
    }
  }
}

impl std::error::Error for FetchError {}

/// Errors that can occur when building a cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  /// The retry policy was configured with zero attempts; at least the
  /// initial attempt must be allowed.
  ZeroAttempts,
  /// The janitor sweep interval cannot be zero.
  ZeroSweepInterval,
  /// No `TaskSpawner` was configured and the builder was not called from
  /// within a tokio runtime.
  SpawnerRequired,
}

impl fmt::Display for BuildError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BuildError::ZeroAttempts => write!(f, "retry policy must allow at least one attempt"),
      BuildError::ZeroSweepInterval => write!(f, "sweep interval cannot be zero"),
      BuildError::SpawnerRequired => write!(
        f,
        "building a cache requires a task spawner or an ambient tokio runtime"
      ),
    }
  }
}

impl std::error::Error for BuildError {}

/// Errors surfaced by a [`StorageBackend`](crate::persist::StorageBackend).
///
/// The cache treats persistence as best-effort: these are logged and
/// swallowed, never propagated to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
  /// The backing store rejected the write (quota, read-only, ...).
  WriteFailed(String),
  /// The stored blob could not be decoded.
  Corrupt(String),
}

impl fmt::Display for StorageError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StorageError::WriteFailed(msg) => write!(f, "storage write failed: {}", msg),
      StorageError::Corrupt(msg) => write!(f, "storage blob corrupt: {}", msg),
    }
  }
}

impl std::error::Error for StorageError {}
