use core::fmt;
use std::borrow::Borrow;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;

type Shard<K, V, H> = CachePadded<RwLock<HashMap<K, Arc<V>, H>>>;

/// A helper function to hash a key using a `BuildHasher`.
#[inline]
pub(crate) fn hash_key<Q: Hash + ?Sized, H: BuildHasher>(hasher: &H, key: &Q) -> u64 {
  hasher.hash_one(key)
}

/// A concurrent map partitioned into multiple, independently locked shards.
///
/// Values are held as `Arc<V>`. Conditional removal compares those `Arc`s by
/// identity, never by value, so an entry that was replaced by a concurrent
/// writer is never mistaken for the one a caller observed earlier.
pub(crate) struct ShardedStore<K, V, H> {
  shards: Box<[Shard<K, V, H>]>,
  hasher: H,
}

impl<K, V, H> fmt::Debug for ShardedStore<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ShardedStore")
      .field("num_shards", &self.shards.len())
      .finish()
  }
}

impl<K, V, H> ShardedStore<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  /// Creates a new `ShardedStore` with the specified number of shards and hasher.
  ///
  /// `num_shards` must be a non-zero power of two; the builders guarantee it.
  pub(crate) fn new(num_shards: usize, hasher: H) -> Self {
    debug_assert!(num_shards.is_power_of_two());
    let mut shards = Vec::with_capacity(num_shards);
    for _ in 0..num_shards {
      let shard_map = HashMap::with_hasher(hasher.clone());
      shards.push(CachePadded::new(RwLock::new(shard_map)));
    }

    Self {
      shards: shards.into_boxed_slice(),
      hasher,
    }
  }

  #[inline]
  fn shard_for<Q>(&self, key: &Q) -> &RwLock<HashMap<K, Arc<V>, H>>
  where
    Q: Hash + ?Sized,
  {
    let index = hash_key(&self.hasher, key) as usize & (self.shards.len() - 1);
    &self.shards[index]
  }

  pub(crate) fn load<Q>(&self, key: &Q) -> Option<Arc<V>>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.shard_for(key).read().get(key).cloned()
  }

  /// Unconditionally stores `value`, returning the value it replaced.
  pub(crate) fn store(&self, key: K, value: Arc<V>) -> Option<Arc<V>> {
    self.shard_for(&key).write().insert(key, value)
  }

  /// Returns the existing value for `key` if present (`loaded == true`),
  /// otherwise stores `value` and returns it (`loaded == false`).
  pub(crate) fn load_or_store(&self, key: K, value: Arc<V>) -> (Arc<V>, bool) {
    let mut guard = self.shard_for(&key).write();
    match guard.entry(key) {
      Entry::Occupied(occupied) => (occupied.get().clone(), true),
      Entry::Vacant(vacant) => (vacant.insert(value).clone(), false),
    }
  }

  pub(crate) fn load_and_delete<Q>(&self, key: &Q) -> Option<Arc<V>>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.shard_for(key).write().remove(key)
  }

  /// Like `load_and_delete`, but also hands back the stored key.
  pub(crate) fn remove_entry<Q>(&self, key: &Q) -> Option<(K, Arc<V>)>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.shard_for(key).write().remove_entry(key)
  }

  /// Removes the value for `key` only if it is the very `Arc` in `expected`.
  pub(crate) fn compare_and_delete<Q>(&self, key: &Q, expected: &Arc<V>) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.compare_and_remove(key, expected).is_some()
  }

  /// Like `compare_and_delete`, returning the stored key on success.
  pub(crate) fn compare_and_remove<Q>(&self, key: &Q, expected: &Arc<V>) -> Option<K>
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    let mut guard = self.shard_for(key).write();
    match guard.get(key) {
      Some(current) if Arc::ptr_eq(current, expected) => guard.remove_entry(key).map(|(k, _)| k),
      _ => None,
    }
  }

  /// Visits every key/value pair until `visit` returns `false`.
  ///
  /// Each shard is snapshotted under its read lock and visited after the lock
  /// is released, so `visit` may freely call back into the store. Entries
  /// added or removed during the walk may or may not be observed.
  ///
  /// Returns `true` if every pair was visited.
  pub(crate) fn range<F>(&self, mut visit: F) -> bool
  where
    K: Clone,
    F: FnMut(&K, &Arc<V>) -> bool,
  {
    for shard in self.shards.iter() {
      let snapshot: Vec<(K, Arc<V>)> = shard
        .read()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
      for (key, value) in &snapshot {
        if !visit(key, value) {
          return false;
        }
      }
    }
    true
  }

  pub(crate) fn clear(&self) {
    for shard in self.shards.iter() {
      shard.write().clear();
    }
  }

  /// The number of stored pairs, summed shard by shard.
  pub(crate) fn len(&self) -> usize {
    self.shards.iter().map(|shard| shard.read().len()).sum()
  }

  pub(crate) fn num_shards(&self) -> usize {
    self.shards.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn store() -> ShardedStore<String, u32, ahash::RandomState> {
    ShardedStore::new(4, ahash::RandomState::new())
  }

  #[test]
  fn load_or_store_keeps_first_value() {
    let s = store();
    let (v, loaded) = s.load_or_store("a".into(), Arc::new(1));
    assert!(!loaded);
    assert_eq!(*v, 1);
    let (v, loaded) = s.load_or_store("a".into(), Arc::new(2));
    assert!(loaded);
    assert_eq!(*v, 1);
  }

  #[test]
  fn compare_and_delete_uses_identity() {
    let s = store();
    let first = Arc::new(7);
    s.store("k".into(), first.clone());
    // An equal value in a different allocation must not match.
    assert!(!s.compare_and_delete("k", &Arc::new(7)));
    assert!(s.compare_and_delete("k", &first));
    assert!(s.load("k").is_none());
    assert!(!s.compare_and_delete("k", &first));
  }

  #[test]
  fn compare_and_delete_misses_replaced_value() {
    let s = store();
    let old = Arc::new(1);
    s.store("k".into(), old.clone());
    s.store("k".into(), Arc::new(1));
    assert!(!s.compare_and_delete("k", &old));
    assert_eq!(s.len(), 1);
  }

  #[test]
  fn range_allows_mutation_and_stops_early() {
    let s = store();
    for i in 0..32u32 {
      s.store(i.to_string(), Arc::new(i));
    }
    let mut seen = 0;
    let completed = s.range(|k, v| {
      s.compare_and_delete(k.as_str(), v);
      seen += 1;
      seen < 10
    });
    assert!(!completed);
    assert_eq!(seen, 10);
    assert_eq!(s.len(), 22);

    assert!(s.range(|_, _| true));
    s.clear();
    assert_eq!(s.len(), 0);
  }

  #[test]
  fn load_and_delete_returns_removed() {
    let s = store();
    s.store("x".into(), Arc::new(3));
    assert_eq!(s.load_and_delete("x").as_deref(), Some(&3));
    assert!(s.load_and_delete("x").is_none());
  }
}
