use crate::builder::MapCacheBuilder;
use crate::entry::ExpiringEntry;
use crate::listener::{EvictionListener, EvictionReason};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::store::ShardedStore;
use crate::task::sweeper::{Sweep, Sweeper};
use crate::time;

use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// The internal, thread-safe core of a map cache.
pub(crate) struct MapShared<K, V, H> {
  pub(crate) entries: ShardedStore<K, ExpiringEntry<V>, H>,
  pub(crate) listener: Option<Arc<dyn EvictionListener<K, V>>>,
  pub(crate) time_to_live: Option<Duration>,
  pub(crate) metrics: Metrics,
  pub(crate) sweeper: Arc<Sweeper>,
  pub(crate) member_id: u64,
}

impl<K, V, H> Drop for MapShared<K, V, H> {
  fn drop(&mut self) {
    self.sweeper.deregister(self.member_id);
  }
}

impl<K, V, H> MapShared<K, V, H>
where
  K: Eq + Hash + Clone,
  H: BuildHasher + Clone,
{
  /// Removes `entry` under `key` if it is still the one stored there and
  /// notifies the listener. Every removal of a single entry goes through
  /// here or through `removed`, so the listener fires once per removal.
  fn evict<Q>(&self, key: &Q, entry: &Arc<ExpiringEntry<V>>, reason: EvictionReason) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    match self.entries.compare_and_remove(key, entry) {
      Some(key) => {
        self.removed(&key, entry, reason);
        true
      }
      None => false,
    }
  }

  /// Bookkeeping for an entry this thread has just taken out of the store.
  fn removed(&self, key: &K, entry: &ExpiringEntry<V>, reason: EvictionReason) {
    let counter = match reason {
      EvictionReason::Expired => &self.metrics.evicted_by_ttl,
      EvictionReason::Invalidated => &self.metrics.invalidations,
      EvictionReason::Cleared => &self.metrics.cleared,
    };
    counter.fetch_add(1, Ordering::Relaxed);

    if let Some(listener) = &self.listener {
      listener.on_evict(key, entry.value(), reason);
    }
  }

  fn evict_expired(&self) -> usize {
    let now = time::now_nanos();
    let mut removed = 0;
    self.entries.range(|key, entry| {
      if entry.is_expired_at(now) && self.evict(key, entry, EvictionReason::Expired) {
        removed += 1;
      }
      true
    });
    removed
  }
}

impl<K, V, H> Sweep for MapShared<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync,
  V: Send + Sync,
  H: BuildHasher + Clone + Send + Sync,
{
  fn sweep(&self) -> usize {
    self.evict_expired()
  }
}

/// A thread-safe map whose entries each carry their own time-to-live.
///
/// Expired entries are never returned. They are removed lazily by whatever
/// operation stumbles over them, and proactively by the [`Sweeper`] the
/// cache is registered with, so keys nobody reads again do not linger.
///
/// There is no cache-wide lock. Every removal is a compare-and-delete against
/// the exact entry that was observed, so a removal can never take out an
/// entry a concurrent `store` has just put in its place.
///
/// Cloning a `MapCache` yields another handle to the same map. The cache
/// leaves its sweeper when the last handle is dropped.
pub struct MapCache<K, V, H = ahash::RandomState> {
  pub(crate) shared: Arc<MapShared<K, V, H>>,
}

impl<K, V, H> Clone for MapCache<K, V, H> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<K, V, H> fmt::Debug for MapCache<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MapCache")
      .field("len", &self.shared.entries.len())
      .field("time_to_live", &self.shared.time_to_live)
      .field("has_listener", &self.shared.listener.is_some())
      .field("metrics", &self.shared.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

impl<K, V> MapCache<K, V, ahash::RandomState>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  /// Creates a cache with default settings, registered with the global sweeper.
  pub fn new() -> Self {
    MapCacheBuilder::new().assemble()
  }

  pub fn builder() -> MapCacheBuilder<K, V, ahash::RandomState> {
    MapCacheBuilder::new()
  }
}

impl<K, V> Default for MapCache<K, V, ahash::RandomState>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

impl<K, V, H> MapCache<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Stores `value` under `key` for `ttl`, replacing whatever was there.
  pub fn store(&self, key: K, value: V, ttl: Duration) {
    self.put(key, ExpiringEntry::new(value, ttl));
  }

  /// Stores `value` under `key` with the cache's default time-to-live.
  /// Without one, the entry only leaves the cache when removed.
  pub fn insert(&self, key: K, value: V) {
    let entry = match self.shared.time_to_live {
      Some(ttl) => ExpiringEntry::new(value, ttl),
      None => ExpiringEntry::new_persistent(value),
    };
    self.put(key, entry);
  }

  fn put(&self, key: K, entry: ExpiringEntry<V>) {
    self.shared.entries.store(key, Arc::new(entry));
    self.shared.metrics.inserts.fetch_add(1, Ordering::Relaxed);
  }

  /// Looks up the live entry for `key`.
  ///
  /// An expired entry found here is removed (notifying the listener) and
  /// reported as a miss.
  pub fn load<Q>(&self, key: &Q) -> Option<Arc<ExpiringEntry<V>>>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    let shared = &self.shared;
    let entry = match shared.entries.load(key) {
      Some(entry) => entry,
      None => {
        shared.metrics.misses.fetch_add(1, Ordering::Relaxed);
        return None;
      }
    };

    if !entry.is_expired() {
      shared.metrics.hits.fetch_add(1, Ordering::Relaxed);
      return Some(entry);
    }

    shared.metrics.misses.fetch_add(1, Ordering::Relaxed);
    // If a concurrent store already replaced it, this is a no-op and the
    // newer entry survives.
    shared.evict(key, &entry, EvictionReason::Expired);
    None
  }

  /// Looks up the live value for `key`. See [`load`](Self::load).
  pub fn get<Q>(&self, key: &Q) -> Option<Arc<V>>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.load(key).map(|entry| entry.value())
  }

  /// Returns the live entry for `key` (`loaded == true`), or stores `value`
  /// for `ttl` and returns the new entry (`loaded == false`).
  ///
  /// An expired entry in the way is removed first. If another thread
  /// replaces it in the meantime, whatever that thread stored is returned as
  /// loaded.
  pub fn load_or_store(&self, key: K, value: V, ttl: Duration) -> (Arc<ExpiringEntry<V>>, bool) {
    let shared = &self.shared;
    let candidate = Arc::new(ExpiringEntry::new(value, ttl));
    loop {
      let (actual, loaded) = shared.entries.load_or_store(key.clone(), candidate.clone());
      if !loaded {
        shared.metrics.inserts.fetch_add(1, Ordering::Relaxed);
        return (actual, false);
      }
      if !actual.is_expired() {
        shared.metrics.hits.fetch_add(1, Ordering::Relaxed);
        return (actual, true);
      }
      if shared.evict(&key, &actual, EvictionReason::Expired) {
        continue;
      }
      // Lost the race to remove the stale entry: someone else already did,
      // and may have stored a replacement.
      if let Some(current) = shared.entries.load(&key) {
        shared.metrics.hits.fetch_add(1, Ordering::Relaxed);
        return (current, true);
      }
    }
  }

  /// Removes the entry for `key`, live or expired. Returns whether there was one.
  pub fn delete<Q>(&self, key: &Q) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    match self.shared.entries.remove_entry(key) {
      Some((key, entry)) => {
        self.shared.removed(&key, &entry, EvictionReason::Invalidated);
        true
      }
      None => false,
    }
  }

  /// Removes the entry for `key` and returns it if it was still live.
  ///
  /// The listener is notified either way; an expired entry is reported as
  /// `Expired` and not returned.
  pub fn load_and_delete<Q>(&self, key: &Q) -> Option<Arc<ExpiringEntry<V>>>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    let (key, entry) = self.shared.entries.remove_entry(key)?;
    if entry.is_expired() {
      self.shared.removed(&key, &entry, EvictionReason::Expired);
      return None;
    }
    self.shared.removed(&key, &entry, EvictionReason::Invalidated);
    Some(entry)
  }

  /// Removes `entry` from under `key` only if it is still the very entry
  /// stored there, as returned earlier by `load`, `load_or_store` or `range`.
  ///
  /// Returns `false`, without notifying the listener, if the entry was
  /// already removed or replaced.
  pub fn compare_and_delete<Q>(&self, key: &Q, entry: &Arc<ExpiringEntry<V>>) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    let reason = if entry.is_expired() {
      EvictionReason::Expired
    } else {
      EvictionReason::Invalidated
    };
    self.shared.evict(key, entry, reason)
  }

  /// Removes the live entry for `key` if its value equals `value`.
  pub fn compare_value_and_delete<Q>(&self, key: &Q, value: &V) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
    V: PartialEq,
  {
    match self.load(key) {
      Some(entry) if *entry.value() == *value => self.compare_and_delete(key, &entry),
      _ => false,
    }
  }

  /// Removes every entry.
  ///
  /// With a listener installed, each entry present when the call starts is
  /// removed individually and reported exactly once as `Cleared`. Entries
  /// stored while the call runs may or may not be removed, but are never
  /// reported twice. Without a listener, the shards are simply emptied.
  pub fn clear(&self) {
    let shared = &self.shared;
    if shared.listener.is_none() {
      let len = shared.entries.len() as u64;
      shared.entries.clear();
      shared.metrics.cleared.fetch_add(len, Ordering::Relaxed);
      return;
    }

    let mut present = Vec::new();
    shared.entries.range(|key, entry| {
      present.push((key.clone(), entry.clone()));
      true
    });
    for (key, entry) in &present {
      shared.evict(key, entry, EvictionReason::Cleared);
    }
  }

  /// Visits every live entry until `visit` returns `false`.
  ///
  /// Expired entries met on the way are removed instead of visited. The
  /// order is unspecified.
  pub fn range<F>(&self, mut visit: F)
  where
    F: FnMut(&K, &Arc<ExpiringEntry<V>>) -> bool,
  {
    let shared = &self.shared;
    shared.entries.range(|key, entry| {
      if entry.is_expired() {
        shared.evict(key, entry, EvictionReason::Expired);
        return true;
      }
      visit(key, entry)
    });
  }

  /// Removes every expired entry now and returns how many were removed.
  /// This is what the sweeper runs on each tick.
  pub fn evict_expired(&self) -> usize {
    self.shared.evict_expired()
  }

  /// The number of stored entries, including expired ones not yet removed.
  pub fn len(&self) -> usize {
    self.shared.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  /// The default time-to-live used by [`insert`](Self::insert).
  pub fn time_to_live(&self) -> Option<Duration> {
    self.shared.time_to_live
  }

  /// The sweeper this cache registers with.
  pub fn sweeper(&self) -> &Arc<Sweeper> {
    &self.shared.sweeper
  }

  /// Registers the cache with its sweeper. Building a cache already does
  /// this; it is only needed after [`close`](Self::close).
  pub fn start(&self) {
    let member: Weak<dyn Sweep> = Arc::downgrade(&self.shared) as Weak<dyn Sweep>;
    self.shared.sweeper.register(self.shared.member_id, member);
  }

  /// Takes the cache out of future sweeps. Reads keep honoring expiry;
  /// expired entries are then only removed lazily.
  pub fn close(&self) {
    self.shared.sweeper.deregister(self.shared.member_id);
  }

  /// Whether the cache is currently part of its sweeper's sweeps.
  pub fn is_registered(&self) -> bool {
    self.shared.sweeper.is_member(self.shared.member_id)
  }
}
