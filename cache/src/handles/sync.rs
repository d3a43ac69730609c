use crate::builder::RefreshCacheBuilder;
use crate::metrics::RefreshMetricsSnapshot;
use crate::refresh::refresher::{clear_hook, SyncRefreshFn};
use crate::refresh::{MaxAge, Raw, RefreshContext, RefreshData};
use crate::shared::RefreshShared;

use std::fmt;
use std::sync::Arc;

/// A thread-safe, blocking refresh cache.
///
/// Holds one value produced by an installed refresh function and serves it
/// while it is fresh. Concurrent callers that find it stale collapse into a
/// single refresh; the others block until it finishes and share its result.
///
/// ```
/// use fibre_memo::RefreshCache;
/// use std::time::Duration;
///
/// let cache = RefreshCache::builder(Duration::from_secs(30))
///   .refresher(|_ctx, region: &'static str| Ok::<_, String>(format!("config for {region}")))
///   .build()
///   .unwrap();
///
/// assert_eq!(*cache.get("eu").unwrap(), "config for eu");
/// ```
pub struct RefreshCache<T, A, E> {
  pub(crate) shared: Arc<RefreshShared<T, A, E, SyncRefreshFn<T, A, E>>>,
}

impl<T, A, E> Clone for RefreshCache<T, A, E> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<T, A, E> fmt::Debug for RefreshCache<T, A, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RefreshCache")
      .field("shared", &self.shared)
      .finish()
  }
}

impl<T, A, E> RefreshCache<T, A, E>
where
  T: Send + Sync + 'static,
  A: 'static,
  E: Clone + Send + Sync + 'static,
{
  /// Starts configuring a refresh cache whose values stay fresh for `max_age`.
  pub fn builder(max_age: impl Into<MaxAge>) -> RefreshCacheBuilder<T, A, E> {
    RefreshCacheBuilder::new(max_age)
  }

  /// Creates a refresh cache without negative caching.
  pub fn new<F>(max_age: impl Into<MaxAge>, refresher: F) -> Self
  where
    F: Fn(RefreshContext<T>, A) -> Result<T, E> + Send + Sync + 'static,
  {
    let data = RefreshData::new(max_age);
    let refresher: SyncRefreshFn<T, A, E> = Arc::new(refresher);
    Self {
      shared: Arc::new(RefreshShared::new(data, refresher, None)),
    }
  }

  /// Returns the cached value if fresh, otherwise runs the installed refresh
  /// function with `args`. See [`RefreshData::get`].
  pub fn get(&self, args: A) -> Result<Arc<T>, E> {
    let refresher = self.shared.refresher();
    self.shared.data.get(args, |ctx, args| refresher(ctx, args))
  }

  /// Runs the installed refresh function regardless of freshness.
  pub fn refresh(&self, args: A) -> Result<Arc<T>, E> {
    let refresher = self.shared.refresher();
    self.shared.data.refresh(args, |ctx, args| refresher(ctx, args))
  }

  /// A non-blocking look at the slot. See [`RefreshData::raw`].
  pub fn raw(&self) -> Raw<T, E> {
    self.shared.data.raw()
  }

  /// Marks the value stale so the next `get` refreshes.
  pub fn clear(&self) {
    self.shared.data.clear();
  }

  /// Marks the value stale and runs the installed clear hook, if any, with
  /// the value it held.
  pub fn clear_with(&self, args: A) -> Result<(), E> {
    self.shared.clear_with(args)
  }

  /// Installs a new refresh function for subsequent calls.
  pub fn set_refresher<F>(&self, refresher: F)
  where
    F: Fn(RefreshContext<T>, A) -> Result<T, E> + Send + Sync + 'static,
  {
    self.shared.set_refresher(Arc::new(refresher));
  }

  /// Installs (or replaces) the hook run by [`clear_with`](Self::clear_with).
  pub fn set_clear_hook<F>(&self, hook: F)
  where
    F: Fn(RefreshContext<T>, A) -> Result<(), E> + Send + Sync + 'static,
  {
    self.shared.set_clear_hook(Some(clear_hook(hook)));
  }

  /// The underlying slot, for inspecting its timestamps and policy.
  pub fn data(&self) -> &RefreshData<T, E> {
    &self.shared.data
  }

  pub fn metrics(&self) -> RefreshMetricsSnapshot {
    self.shared.data.metrics()
  }
}
