//! A stale-while-revalidate cache and data-fetching layer for async Rust
//! clients.
//!
//! # Features
//! - **Stale-While-Revalidate**: expired-but-present data is served
//!   immediately while a background refresh runs; data is never discarded by
//!   staleness alone.
//! - **Request Deduplication**: concurrent callers for the same key share a
//!   single underlying fetch and observe the same outcome.
//! - **Retry with Backoff**: transient failures are retried with bounded
//!   exponential backoff; terminal failures (401/403/404, validation) are
//!   surfaced immediately.
//! - **Persistence**: optional `serde` feature for saving and restoring the
//!   cache across sessions through a pluggable storage backend.
//! - **Revalidation Triggers**: focus and reconnect entry points refresh
//!   stale entries in the background without blocking consumers.

// Public modules that form the API
pub mod builder;
pub mod entry;
pub mod error;
pub mod handles;
pub mod loader;
pub mod metrics;
pub mod retry;
pub mod runtime;
pub mod subscription;

// Internal, crate-only modules
mod shared;
mod store;
mod task;
mod time;

#[cfg(feature = "serde")]
pub mod persist;

// Re-export the primary user-facing types for convenience
pub use builder::SwrCacheBuilder;
pub use entry::{EntryOptions, EntryView};
pub use error::{BuildError, ErrorKind, FetchError, StorageError};
pub use handles::SwrCache;
pub use loader::{fetcher, Fetcher};
pub use metrics::{CacheStats, MetricsSnapshot};
pub use retry::RetryPolicy;
pub use runtime::{TaskSpawner, TokioSpawner};
pub use subscription::{FetchState, Mutation, MutationState, SwrHandle};

#[cfg(feature = "serde")]
pub use persist::StorageBackend;
