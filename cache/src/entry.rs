use crate::time;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A value stored in a [`MapCache`](crate::MapCache) together with its
/// absolute expiration time.
///
/// The expiration is kept in an atomic so readers, writers and the sweeper can
/// race on it freely. Handles to entries are shared as `Arc<ExpiringEntry<V>>`,
/// and removal from a map is conditioned on the identity of that `Arc`.
pub struct ExpiringEntry<V> {
  value: Arc<V>,
  /// Expiration in nanoseconds since the crate epoch. `u64::MAX` never expires.
  expires_at: AtomicU64,
}

impl<V> ExpiringEntry<V> {
  /// Creates an entry that expires `ttl` from now.
  pub(crate) fn new(value: V, ttl: Duration) -> Self {
    Self {
      value: Arc::new(value),
      expires_at: AtomicU64::new(time::deadline_after(ttl)),
    }
  }

  /// Creates an entry that never expires on its own.
  pub(crate) fn new_persistent(value: V) -> Self {
    Self {
      value: Arc::new(value),
      expires_at: AtomicU64::new(u64::MAX),
    }
  }

  /// Returns a clone of the `Arc` containing the value.
  #[inline]
  pub fn value(&self) -> Arc<V> {
    self.value.clone()
  }

  /// Returns the point in time after which this entry is expired, or `None`
  /// if the entry never expires.
  pub fn expires_at(&self) -> Option<Instant> {
    match self.expires_at.load(Ordering::Acquire) {
      u64::MAX => None,
      nanos => time::nanos_to_instant(nanos),
    }
  }

  /// Returns the time left before expiry, or `None` once the entry is expired.
  ///
  /// An entry that never expires reports `Duration::MAX`.
  pub fn time_to_live(&self) -> Option<Duration> {
    let expires_at = self.expires_at.load(Ordering::Acquire);
    if expires_at == u64::MAX {
      return Some(Duration::MAX);
    }
    let now = time::now_nanos();
    if now > expires_at {
      None
    } else {
      Some(Duration::from_nanos(expires_at - now))
    }
  }

  /// Checks whether the entry has expired.
  ///
  /// An entry is expired only once the current time is strictly past its
  /// expiration; at the exact instant of expiry it is still live.
  #[inline]
  pub fn is_expired(&self) -> bool {
    self.is_expired_at(time::now_nanos())
  }

  #[inline]
  pub(crate) fn is_expired_at(&self, now_nanos: u64) -> bool {
    now_nanos > self.expires_at.load(Ordering::Acquire)
  }

  /// Pushes the expiration back by `delta`.
  pub fn add_expiration(&self, delta: Duration) {
    let delta = time::duration_to_nanos(delta);
    // A CAS loop instead of `fetch_add` so the addition saturates.
    let _ = self
      .expires_at
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
        Some(current.saturating_add(delta))
      });
  }

  /// Overwrites the expiration with an absolute point in time.
  pub fn set_expiration(&self, at: Instant) {
    self
      .expires_at
      .store(time::instant_to_nanos(at), Ordering::Release);
  }
}

impl<V: fmt::Debug> fmt::Debug for ExpiringEntry<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ExpiringEntry")
      .field("value", &self.value)
      .field("expires_at", &self.expires_at())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::thread;

  #[test]
  fn fresh_entry_is_live() {
    let entry = ExpiringEntry::new("v", Duration::from_secs(60));
    assert!(!entry.is_expired());
    assert!(entry.time_to_live().unwrap() > Duration::from_secs(59));
  }

  #[test]
  fn entry_expires_after_ttl() {
    let entry = ExpiringEntry::new(1, Duration::from_millis(20));
    thread::sleep(Duration::from_millis(40));
    assert!(entry.is_expired());
    assert!(entry.time_to_live().is_none());
  }

  #[test]
  fn expiry_is_strictly_after_deadline() {
    let entry = ExpiringEntry::new(1, Duration::ZERO);
    let deadline = entry.expires_at.load(Ordering::Acquire);
    assert!(!entry.is_expired_at(deadline));
    assert!(entry.is_expired_at(deadline + 1));
  }

  #[test]
  fn add_expiration_extends_lifetime() {
    let entry = ExpiringEntry::new(1, Duration::from_millis(20));
    entry.add_expiration(Duration::from_secs(60));
    thread::sleep(Duration::from_millis(40));
    assert!(!entry.is_expired());
  }

  #[test]
  fn add_expiration_saturates() {
    let entry = ExpiringEntry::new(1, Duration::from_secs(1));
    entry.add_expiration(Duration::MAX);
    assert!(entry.expires_at().is_none());
    assert_eq!(entry.time_to_live(), Some(Duration::MAX));
  }

  #[test]
  fn set_expiration_in_the_past_expires_immediately() {
    let entry = ExpiringEntry::new(1, Duration::from_secs(60));
    entry.set_expiration(Instant::now());
    thread::sleep(Duration::from_millis(2));
    assert!(entry.is_expired());
  }

  #[test]
  fn persistent_entry_never_expires() {
    let entry = ExpiringEntry::new_persistent(1);
    assert!(!entry.is_expired_at(u64::MAX - 1));
    assert!(entry.expires_at().is_none());
  }
}
