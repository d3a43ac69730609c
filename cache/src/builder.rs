use crate::error::BuildError;
use crate::handles::{AsyncRefreshCache, RefreshCache};
use crate::listener::EvictionListener;
use crate::map::{MapCache, MapShared};
use crate::metrics::Metrics;
use crate::refresh::refresher::{clear_hook, ClearHook, Refresher};
use crate::refresh::{MaxAge, RefreshContext, RefreshData, RefreshPolicy};
use crate::shared::RefreshShared;
use crate::store::ShardedStore;
use crate::task::sweeper::{self, Sweeper};

use core::fmt;
use std::future::Future;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

fn default_shards() -> usize {
  (num_cpus::get() * 4).max(1).next_power_of_two()
}

/// A builder for [`MapCache`] instances.
pub struct MapCacheBuilder<K, V, H = ahash::RandomState> {
  shards: usize,
  hasher: H,
  time_to_live: Option<Duration>,
  listener: Option<Arc<dyn EvictionListener<K, V>>>,
  sweeper: Option<Arc<Sweeper>>,
  _marker: PhantomData<(K, V)>,
}

impl<K, V, H> fmt::Debug for MapCacheBuilder<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MapCacheBuilder")
      .field("shards", &self.shards)
      .field("time_to_live", &self.time_to_live)
      .field("has_listener", &self.listener.is_some())
      .field("has_sweeper", &self.sweeper.is_some())
      .finish_non_exhaustive()
  }
}

impl<K, V, H: BuildHasher + Default> MapCacheBuilder<K, V, H> {
  /// Creates a new `MapCacheBuilder` with default settings.
  pub fn new() -> Self {
    Self {
      shards: default_shards(),
      hasher: H::default(),
      time_to_live: None,
      listener: None,
      sweeper: None,
      _marker: PhantomData,
    }
  }
}

impl<K, V> Default for MapCacheBuilder<K, V, ahash::RandomState> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K, V, H> MapCacheBuilder<K, V, H> {
  /// Sets the number of concurrent shards to use. Rounded up to a power of
  /// two when the cache is built; zero is rejected.
  pub fn shards(mut self, shards: usize) -> Self {
    self.shards = shards;
    self
  }

  /// Sets the hasher for the cache.
  pub fn hasher<H2>(self, hasher: H2) -> MapCacheBuilder<K, V, H2> {
    MapCacheBuilder {
      shards: self.shards,
      hasher,
      time_to_live: self.time_to_live,
      listener: self.listener,
      sweeper: self.sweeper,
      _marker: PhantomData,
    }
  }

  /// Sets the time-to-live applied by [`MapCache::insert`]. `MapCache::store`
  /// always takes an explicit one.
  pub fn time_to_live(mut self, duration: Duration) -> Self {
    self.time_to_live = Some(duration);
    self
  }

  /// Sets the eviction listener for the cache.
  pub fn eviction_listener<Listener>(mut self, listener: Listener) -> Self
  where
    Listener: EvictionListener<K, V> + 'static,
  {
    self.listener = Some(Arc::new(listener));
    self
  }

  /// Registers the cache with `sweeper` instead of the global one.
  pub fn sweeper(mut self, sweeper: Arc<Sweeper>) -> Self {
    self.sweeper = Some(sweeper);
    self
  }
}

impl<K, V, H> MapCacheBuilder<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Builds the cache and registers it with its sweeper, starting the
  /// sweeper's thread if this is its first cache.
  pub fn build(self) -> Result<MapCache<K, V, H>, BuildError> {
    if self.shards == 0 {
      return Err(BuildError::ZeroShards);
    }
    Ok(self.assemble())
  }

  pub(crate) fn assemble(self) -> MapCache<K, V, H> {
    let shards = self.shards.max(1).next_power_of_two();
    let sweeper = self.sweeper.unwrap_or_else(Sweeper::global);

    let cache = MapCache {
      shared: Arc::new(MapShared {
        entries: ShardedStore::new(shards, self.hasher),
        listener: self.listener,
        time_to_live: self.time_to_live,
        metrics: Metrics::new(),
        sweeper,
        member_id: sweeper::next_member_id(),
      }),
    };
    cache.start();

    tracing::debug!(
      shards,
      time_to_live = ?cache.shared.time_to_live,
      member = cache.shared.member_id,
      "map cache built"
    );
    cache
  }
}

/// A builder for [`RefreshCache`] and [`AsyncRefreshCache`] instances.
///
/// A refresh function is required. A plain one can drive either handle; an
/// async one only [`build_async`](Self::build_async).
pub struct RefreshCacheBuilder<T, A, E> {
  policy: RefreshPolicy,
  refresher: Option<Refresher<T, A, E>>,
  clear_hook: Option<ClearHook<T, A, E>>,
}

impl<T, A, E> fmt::Debug for RefreshCacheBuilder<T, A, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let refresher = match self.refresher {
      Some(Refresher::Sync(_)) => "sync",
      Some(Refresher::Async(_)) => "async",
      None => "none",
    };
    f.debug_struct("RefreshCacheBuilder")
      .field("policy", &self.policy)
      .field("refresher", &refresher)
      .field("has_clear_hook", &self.clear_hook.is_some())
      .finish()
  }
}

impl<T, A, E> RefreshCacheBuilder<T, A, E> {
  /// Creates a builder whose values stay fresh for `max_age`.
  pub fn new(max_age: impl Into<MaxAge>) -> Self {
    Self::from_policy(RefreshPolicy::new(max_age))
  }

  /// Creates a builder from a complete policy, e.g. one read from a config file.
  pub fn from_policy(policy: RefreshPolicy) -> Self {
    Self {
      policy,
      refresher: None,
      clear_hook: None,
    }
  }

  pub fn max_age(mut self, max_age: impl Into<MaxAge>) -> Self {
    self.policy.max_age = max_age.into();
    self
  }

  /// Caches refresh failures for `age`. Zero, the default, disables it.
  pub fn error_max_age(mut self, age: Duration) -> Self {
    self.policy.error_max_age = age;
    self
  }

  /// Sets the synchronous refresh function.
  pub fn refresher<F>(mut self, f: F) -> Self
  where
    F: Fn(RefreshContext<T>, A) -> Result<T, E> + Send + Sync + 'static,
  {
    self.refresher = Some(Refresher::from_sync(f));
    self
  }

  /// Sets the asynchronous refresh function.
  pub fn async_refresher<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn(RefreshContext<T>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    self.refresher = Some(Refresher::from_async(f));
    self
  }

  /// Sets the hook run by `clear_with`, with the value being cleared.
  pub fn clear_hook<F>(mut self, f: F) -> Self
  where
    F: Fn(RefreshContext<T>, A) -> Result<(), E> + Send + Sync + 'static,
  {
    self.clear_hook = Some(clear_hook(f));
    self
  }
}

impl<T, A, E> RefreshCacheBuilder<T, A, E>
where
  T: Send + Sync + 'static,
  A: 'static,
  E: Clone + Send + Sync + 'static,
{
  /// Builds a blocking `RefreshCache`.
  pub fn build(self) -> Result<RefreshCache<T, A, E>, BuildError> {
    let refresher = match self.refresher {
      Some(Refresher::Sync(f)) => f,
      Some(Refresher::Async(_)) => return Err(BuildError::AsyncRefresher),
      None => return Err(BuildError::MissingRefresher),
    };
    let data = RefreshData::with_policy(self.policy);
    Ok(RefreshCache {
      shared: Arc::new(RefreshShared::new(data, refresher, self.clear_hook)),
    })
  }

  /// Builds an `AsyncRefreshCache`.
  pub fn build_async(self) -> Result<AsyncRefreshCache<T, A, E>, BuildError> {
    let refresher = self.refresher.ok_or(BuildError::MissingRefresher)?;
    let data = RefreshData::with_policy(self.policy);
    Ok(AsyncRefreshCache {
      shared: Arc::new(RefreshShared::new(data, refresher, self.clear_hook)),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_shards_is_rejected() {
    let result = MapCacheBuilder::<u32, u32>::new().shards(0).build();
    assert_eq!(result.err(), Some(BuildError::ZeroShards));
  }

  #[test]
  fn shards_round_up_to_power_of_two() {
    let cache = MapCacheBuilder::<u32, u32>::new()
      .shards(5)
      .sweeper(Sweeper::new(Default::default()))
      .build()
      .unwrap();
    assert_eq!(cache.shared.entries.num_shards(), 8);
  }

  #[test]
  fn refresh_builder_requires_refresher() {
    let result = RefreshCacheBuilder::<u32, (), String>::new(Duration::from_secs(1)).build();
    assert_eq!(result.err(), Some(BuildError::MissingRefresher));

    let result = RefreshCacheBuilder::<u32, (), String>::new(MaxAge::Forever).build_async();
    assert_eq!(result.err(), Some(BuildError::MissingRefresher));
  }

  #[test]
  fn async_refresher_cannot_build_blocking_handle() {
    let builder = RefreshCacheBuilder::<u32, (), String>::new(MaxAge::Forever)
      .async_refresher(|_ctx, ()| async { Ok(1) });
    assert_eq!(builder.build().err(), Some(BuildError::AsyncRefresher));
  }

  #[test]
  fn builder_collects_policy() {
    let builder = RefreshCacheBuilder::<u32, (), String>::new(Duration::from_secs(1))
      .max_age(Duration::from_secs(2))
      .error_max_age(Duration::from_millis(500))
      .refresher(|_ctx, ()| Ok(7));
    let cache = builder.build().unwrap();
    assert_eq!(cache.data().max_age(), MaxAge::Ttl(Duration::from_secs(2)));
    assert_eq!(cache.data().error_max_age(), Duration::from_millis(500));
  }
}
