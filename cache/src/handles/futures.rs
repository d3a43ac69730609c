use crate::builder::RefreshCacheBuilder;
use crate::metrics::RefreshMetricsSnapshot;
use crate::refresh::refresher::{clear_hook, Refresher};
use crate::refresh::{MaxAge, Raw, RefreshContext, RefreshData};
use crate::shared::RefreshShared;

use std::fmt;
use std::future::{self, Future};
use std::sync::Arc;

// --- AsyncRefreshCache Implementation ---

/// A thread-safe, asynchronous refresh cache.
///
/// The async counterpart of [`RefreshCache`](crate::RefreshCache). Callers
/// waiting for another caller's refresh yield to the executor instead of
/// blocking it. The installed refresh function may be async or plain; a plain
/// one runs inline on the task that performs the refresh.
pub struct AsyncRefreshCache<T, A, E> {
  pub(crate) shared: Arc<RefreshShared<T, A, E, Refresher<T, A, E>>>,
}

impl<T, A, E> Clone for AsyncRefreshCache<T, A, E> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<T, A, E> fmt::Debug for AsyncRefreshCache<T, A, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AsyncRefreshCache")
      .field("shared", &self.shared)
      .finish()
  }
}

impl<T, A, E> AsyncRefreshCache<T, A, E>
where
  T: Send + Sync + 'static,
  A: Send + 'static,
  E: Clone + Send + Sync + 'static,
{
  /// Starts configuring a refresh cache whose values stay fresh for `max_age`.
  /// Finish with [`build_async`](RefreshCacheBuilder::build_async).
  pub fn builder(max_age: impl Into<MaxAge>) -> RefreshCacheBuilder<T, A, E> {
    RefreshCacheBuilder::new(max_age)
  }

  /// Returns the cached value if fresh, otherwise runs the installed refresh
  /// function with `args`. See [`RefreshData::get_async`].
  pub async fn get(&self, args: A) -> Result<Arc<T>, E> {
    match self.shared.refresher() {
      Refresher::Sync(f) => {
        self
          .shared
          .data
          .get_async(args, move |ctx, args| future::ready(f(ctx, args)))
          .await
      }
      Refresher::Async(f) => self.shared.data.get_async(args, move |ctx, args| f(ctx, args)).await,
    }
  }

  /// Runs the installed refresh function regardless of freshness.
  pub async fn refresh(&self, args: A) -> Result<Arc<T>, E> {
    match self.shared.refresher() {
      Refresher::Sync(f) => {
        self
          .shared
          .data
          .refresh_async(args, move |ctx, args| future::ready(f(ctx, args)))
          .await
      }
      Refresher::Async(f) => {
        self
          .shared
          .data
          .refresh_async(args, move |ctx, args| f(ctx, args))
          .await
      }
    }
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

  /// Installs a plain refresh function for subsequent calls.
  pub fn set_refresher<F>(&self, refresher: F)
  where
    F: Fn(RefreshContext<T>, A) -> Result<T, E> + Send + Sync + 'static,
  {
    self.shared.set_refresher(Refresher::from_sync(refresher));
  }

  /// Installs an async refresh function for subsequent calls.
  pub fn set_async_refresher<F, Fut>(&self, refresher: F)
  where
    F: Fn(RefreshContext<T>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    self.shared.set_refresher(Refresher::from_async(refresher));
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
