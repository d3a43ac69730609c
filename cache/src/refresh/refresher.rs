use super::RefreshContext;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed, sendable future, as returned by async refresh functions.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub(crate) type SyncRefreshFn<T, A, E> =
  Arc<dyn Fn(RefreshContext<T>, A) -> Result<T, E> + Send + Sync>;

pub(crate) type AsyncRefreshFn<T, A, E> =
  Arc<dyn Fn(RefreshContext<T>, A) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

pub(crate) type ClearHook<T, A, E> = Arc<dyn Fn(RefreshContext<T>, A) -> Result<(), E> + Send + Sync>;

/// Either a synchronous or an asynchronous refresh function.
///
/// This is stored in the `RefreshCacheBuilder` and the async handle's shared
/// core. We use `Arc<dyn ...>` so the installed function can be cloned out
/// of its lock and called without holding it.
pub(crate) enum Refresher<T, A, E> {
  Sync(SyncRefreshFn<T, A, E>),
  Async(AsyncRefreshFn<T, A, E>),
}

impl<T, A, E> Clone for Refresher<T, A, E> {
  fn clone(&self) -> Self {
    match self {
      Refresher::Sync(f) => Refresher::Sync(f.clone()),
      Refresher::Async(f) => Refresher::Async(f.clone()),
    }
  }
}

impl<T, A, E> Refresher<T, A, E> {
  pub(crate) fn from_sync<F>(f: F) -> Self
  where
    F: Fn(RefreshContext<T>, A) -> Result<T, E> + Send + Sync + 'static,
  {
    Refresher::Sync(Arc::new(f))
  }

  pub(crate) fn from_async<F, Fut>(f: F) -> Self
  where
    F: Fn(RefreshContext<T>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    let refresh_fn = move |ctx, args| Box::pin(f(ctx, args)) as BoxFuture<'static, Result<T, E>>;
    Refresher::Async(Arc::new(refresh_fn))
  }
}

pub(crate) fn clear_hook<T, A, E, F>(f: F) -> ClearHook<T, A, E>
where
  F: Fn(RefreshContext<T>, A) -> Result<(), E> + Send + Sync + 'static,
{
  Arc::new(f)
}
