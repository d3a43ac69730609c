//! Concurrent, sync/async caches for values that are expensive to produce.
//!
//! # Features
//! - **Refresh caches**: [`RefreshCache`] and [`AsyncRefreshCache`] hold a
//!   single value produced by a refresh function. Concurrent readers of a
//!   stale value collapse into one refresh and share its result.
//! - **Negative caching**: refresh failures can be served back for a while
//!   instead of hammering a failing upstream.
//! - **Per-key TTL maps**: [`MapCache`] stores each entry with its own
//!   time-to-live, removes entries by identity (compare-and-delete) and
//!   reports every removal to an optional [`EvictionListener`].
//! - **Background sweeping**: a shared [`Sweeper`] thread removes expired
//!   entries from every map cache, so unread keys do not pile up.
//! - **Observability**: metrics snapshots and `tracing` events.
//! - **Configuration**: optional `serde` support for [`RefreshPolicy`] and
//!   [`SweeperConfig`].

// Public modules that form the API
pub mod builder;
pub mod error;
pub mod handles;
pub mod listener;
pub mod metrics;
pub mod refresh;

// Internal, crate-only modules
mod entry;
mod map;
mod shared;
mod store;
mod sync;
mod task;
mod time;

// Re-export the primary user-facing types for convenience
pub use builder::{MapCacheBuilder, RefreshCacheBuilder};
pub use entry::ExpiringEntry;
pub use error::{BuildError, SweeperError};
pub use handles::{AsyncRefreshCache, RefreshCache};
pub use listener::{EvictionListener, EvictionReason};
pub use map::MapCache;
pub use metrics::{MetricsSnapshot, RefreshMetricsSnapshot};
pub use refresh::refresher::BoxFuture;
pub use refresh::{MaxAge, Raw, RefreshContext, RefreshData, RefreshPolicy};
pub use task::sweeper::{Sweeper, SweeperConfig, DEFAULT_SWEEP_INTERVAL};
