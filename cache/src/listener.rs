use std::fmt;
use std::sync::Arc;

/// Describes the reason an entry was removed from a map cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
  /// The entry's time-to-live ran out. Reported for removals by lookups,
  /// iteration and the sweeper alike.
  Expired,
  /// The entry was removed explicitly.
  Invalidated,
  /// The entry was removed by `clear()`.
  Cleared,
}

impl fmt::Display for EvictionReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EvictionReason::Expired => write!(f, "evicted due to expiration (TTL)"),
      EvictionReason::Invalidated => write!(f, "manually invalidated"),
      EvictionReason::Cleared => write!(f, "removed by clear"),
    }
  }
}

/// A listener that can be registered with a map cache to receive
/// notifications when entries are removed.
///
/// `on_evict` runs synchronously on the thread that performed the removal and
/// is called exactly once per removed entry. No cache lock is held while it
/// runs, so it may call back into the cache.
///
/// Any `Fn(&K, Arc<V>, EvictionReason)` closure is a listener.
pub trait EvictionListener<K, V>: Send + Sync {
  fn on_evict(&self, key: &K, value: Arc<V>, reason: EvictionReason);
}

impl<K, V, F> EvictionListener<K, V> for F
where
  F: Fn(&K, Arc<V>, EvictionReason) + Send + Sync,
{
  fn on_evict(&self, key: &K, value: Arc<V>, reason: EvictionReason) {
    self(key, value, reason)
  }
}
