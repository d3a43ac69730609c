//! The single-slot memoizing value behind [`RefreshCache`](crate::RefreshCache).
//!
//! A [`RefreshData`] holds one value produced by an expensive refresh
//! function. Reads are served from the cached value while it is fresh; once it
//! goes stale, exactly one caller re-runs the refresh function while the others
//! wait for its result. Failures can be cached too ("negative caching"), so a
//! failing upstream is not hammered by every reader.

pub(crate) mod refresher;

use crate::metrics::{RefreshMetrics, RefreshMetricsSnapshot};
use crate::sync::HybridLock;
use crate::time;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How long a successfully refreshed value stays fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MaxAge {
  /// Once a value has been produced it is served forever; the refresh
  /// function only runs again after `clear()`, `refresh()` or a failure.
  Forever,
  /// The value is fresh for this long after the refresh that produced it.
  /// A zero duration means every read refreshes.
  Ttl(Duration),
}

impl MaxAge {
  /// Every read goes to the refresh function.
  pub const ALWAYS_STALE: MaxAge = MaxAge::Ttl(Duration::ZERO);

  #[inline]
  fn is_fresh(self, stamp: u64, now: u64) -> bool {
    if stamp == 0 {
      return false;
    }
    match self {
      MaxAge::Forever => true,
      MaxAge::Ttl(ttl) => now.saturating_sub(stamp) < time::duration_to_nanos(ttl),
    }
  }
}

impl From<Duration> for MaxAge {
  fn from(ttl: Duration) -> Self {
    MaxAge::Ttl(ttl)
  }
}

/// The freshness configuration of a refresh slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RefreshPolicy {
  /// Freshness of a successfully refreshed value.
  pub max_age: MaxAge,
  /// How long a refresh failure is served back to readers before the refresh
  /// function is tried again. Zero disables negative caching.
  #[cfg_attr(feature = "serde", serde(default))]
  pub error_max_age: Duration,
}

impl RefreshPolicy {
  pub fn new(max_age: impl Into<MaxAge>) -> Self {
    Self {
      max_age: max_age.into(),
      error_max_age: Duration::ZERO,
    }
  }

  pub fn error_max_age(mut self, age: Duration) -> Self {
    self.error_max_age = age;
    self
  }
}

/// What a refresh function gets to see besides its arguments.
pub struct RefreshContext<T> {
  previous: Option<Arc<T>>,
}

impl<T> RefreshContext<T> {
  /// The value being replaced: the last value any refresh produced, fresh
  /// or not. `None` until the first successful refresh.
  pub fn previous(&self) -> Option<&T> {
    self.previous.as_deref()
  }

  pub fn previous_arc(&self) -> Option<&Arc<T>> {
    self.previous.as_ref()
  }

  pub fn into_previous(self) -> Option<Arc<T>> {
    self.previous
  }
}

impl<T: fmt::Debug> fmt::Debug for RefreshContext<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RefreshContext")
      .field("previous", &self.previous)
      .finish()
  }
}

/// A non-blocking snapshot of a refresh slot, see [`RefreshData::raw`].
#[derive(Debug, Clone)]
pub struct Raw<T, E> {
  /// The cached value. Stale values are included unless a fresh error
  /// currently takes precedence.
  pub value: Option<Arc<T>>,
  /// The cached error. `None` when a fresh value is being served.
  pub error: Option<E>,
  /// Whether the snapshot reflects fresh state that `get` would serve as-is.
  pub fresh: bool,
}

/// A single memoized value with a max-age, optional negative caching and
/// single-flight refresh.
///
/// `RefreshData` does not own a refresh function; each call hands one in.
/// [`RefreshCache`](crate::RefreshCache) pairs it with an installed function.
///
/// The blocking and async entry points share one lock, so a slot may be used
/// from threads and tasks at the same time.
pub struct RefreshData<T, E> {
  value: RwLock<Option<Arc<T>>>,
  error: RwLock<Option<E>>,
  /// Stamp of the last successful refresh. 0 = none since the last failure or clear.
  last_success: AtomicU64,
  /// Stamp of the last failed refresh. 0 = none since the last success.
  last_error: AtomicU64,
  policy: RefreshPolicy,
  lock: HybridLock,
  metrics: RefreshMetrics,
}

impl<T, E> fmt::Debug for RefreshData<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RefreshData")
      .field("policy", &self.policy)
      .field("last_success", &self.last_success())
      .field("last_error_at", &self.last_error_at())
      .field("metrics", &self.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

impl<T, E> RefreshData<T, E> {
  /// Creates an empty slot. Negative caching is off until
  /// [`with_error_max_age`](Self::with_error_max_age) is used.
  pub fn new(max_age: impl Into<MaxAge>) -> Self {
    Self::with_policy(RefreshPolicy::new(max_age))
  }

  pub fn with_policy(policy: RefreshPolicy) -> Self {
    Self {
      value: RwLock::new(None),
      error: RwLock::new(None),
      last_success: AtomicU64::new(0),
      last_error: AtomicU64::new(0),
      policy,
      lock: HybridLock::new(),
      metrics: RefreshMetrics::default(),
    }
  }

  /// Enables caching of refresh failures for `age`.
  pub fn with_error_max_age(mut self, age: Duration) -> Self {
    self.policy.error_max_age = age;
    self
  }

  pub fn policy(&self) -> RefreshPolicy {
    self.policy
  }

  pub fn max_age(&self) -> MaxAge {
    self.policy.max_age
  }

  pub fn error_max_age(&self) -> Duration {
    self.policy.error_max_age
  }

  /// When the value currently considered for freshness was produced.
  ///
  /// `None` before the first success and after a failure or `clear()`.
  pub fn last_success(&self) -> Option<Instant> {
    match self.last_success.load(Ordering::Acquire) {
      0 => None,
      stamp => time::nanos_to_instant(stamp),
    }
  }

  /// When the last failure happened, `None` if a success came after it.
  pub fn last_error_at(&self) -> Option<Instant> {
    match self.last_error.load(Ordering::Acquire) {
      0 => None,
      stamp => time::nanos_to_instant(stamp),
    }
  }

  pub fn metrics(&self) -> RefreshMetricsSnapshot {
    self.metrics.snapshot()
  }

  /// Marks the value stale so the next `get` refreshes.
  ///
  /// The value itself is kept, so `raw()` and the next refresh's
  /// [`RefreshContext::previous`] still see it. Negative-cache state is left
  /// alone.
  pub fn clear(&self) {
    self.last_success.store(0, Ordering::Release);
  }

  #[inline]
  fn fresh_value(&self, now: u64) -> Option<Arc<T>> {
    let stamp = self.last_success.load(Ordering::Acquire);
    if self.policy.max_age.is_fresh(stamp, now) {
      self.value.read().clone()
    } else {
      None
    }
  }

  fn context(&self) -> RefreshContext<T> {
    RefreshContext {
      previous: self.value.read().clone(),
    }
  }
}

impl<T, E: Clone> RefreshData<T, E> {
  #[inline]
  fn fresh_error(&self, now: u64) -> Option<E> {
    let error_max_age = self.policy.error_max_age;
    if error_max_age.is_zero() {
      return None;
    }
    let stamp = self.last_error.load(Ordering::Acquire);
    if MaxAge::Ttl(error_max_age).is_fresh(stamp, now) {
      self.error.read().clone()
    } else {
      None
    }
  }

  /// The fast-path check shared by the lock-free read and the re-check
  /// under the lock. A fresh value wins over a fresh error.
  fn cached(&self) -> Option<Result<Arc<T>, E>> {
    let now = time::now_nanos();
    if let Some(value) = self.fresh_value(now) {
      self.metrics.hits.fetch_add(1, Ordering::Relaxed);
      return Some(Ok(value));
    }
    if let Some(error) = self.fresh_error(now) {
      self.metrics.error_hits.fetch_add(1, Ordering::Relaxed);
      return Some(Err(error));
    }
    None
  }

  /// Records the outcome of one refresh. Must be called with the lock held.
  fn commit(&self, outcome: Result<T, E>) -> Result<Arc<T>, E> {
    self.metrics.refreshes.fetch_add(1, Ordering::Relaxed);
    match outcome {
      Ok(value) => {
        let value = Arc::new(value);
        *self.value.write() = Some(value.clone());
        self.last_error.store(0, Ordering::Release);
        self.last_success.store(time::now_stamp(), Ordering::Release);
        tracing::trace!(max_age = ?self.policy.max_age, "refresh committed");
        Ok(value)
      }
      Err(error) => {
        self.metrics.failures.fetch_add(1, Ordering::Relaxed);
        *self.error.write() = Some(error.clone());
        self.last_success.store(0, Ordering::Release);
        self.last_error.store(time::now_stamp(), Ordering::Release);
        tracing::debug!(
          error_max_age = ?self.policy.error_max_age,
          "refresh failed"
        );
        Err(error)
      }
    }
  }

  /// Returns the cached value if it is fresh, otherwise refreshes it with
  /// `refresh`, blocking the current thread while another caller refreshes.
  ///
  /// While a refresh failure is fresh (see
  /// [`RefreshPolicy::error_max_age`]), the cached error is returned and
  /// `refresh` is not called.
  pub fn get<A, F>(&self, args: A, refresh: F) -> Result<Arc<T>, E>
  where
    F: FnOnce(RefreshContext<T>, A) -> Result<T, E>,
  {
    if let Some(hit) = self.cached() {
      return hit;
    }

    let _guard = self.lock.lock();
    // Another caller may have refreshed while we waited for the lock.
    if let Some(hit) = self.cached() {
      return hit;
    }

    let outcome = refresh(self.context(), args);
    self.commit(outcome)
  }

  /// The async counterpart of [`get`](Self::get). Waiting for another
  /// caller's refresh does not block the executor.
  ///
  /// Dropping the returned future while `refresh` is in flight abandons that
  /// refresh: nothing is committed and the lock is released.
  pub async fn get_async<A, F, Fut>(&self, args: A, refresh: F) -> Result<Arc<T>, E>
  where
    F: FnOnce(RefreshContext<T>, A) -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    if let Some(hit) = self.cached() {
      return hit;
    }

    let _guard = self.lock.lock_async().await;
    if let Some(hit) = self.cached() {
      return hit;
    }

    let outcome = refresh(self.context(), args).await;
    self.commit(outcome)
  }

  /// Runs `refresh` regardless of freshness and records its outcome.
  pub fn refresh<A, F>(&self, args: A, refresh: F) -> Result<Arc<T>, E>
  where
    F: FnOnce(RefreshContext<T>, A) -> Result<T, E>,
  {
    let _guard = self.lock.lock();
    let outcome = refresh(self.context(), args);
    self.commit(outcome)
  }

  /// The async counterpart of [`refresh`](Self::refresh).
  pub async fn refresh_async<A, F, Fut>(&self, args: A, refresh: F) -> Result<Arc<T>, E>
  where
    F: FnOnce(RefreshContext<T>, A) -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    let _guard = self.lock.lock_async().await;
    let outcome = refresh(self.context(), args).await;
    self.commit(outcome)
  }

  /// Looks at the slot without refreshing or waiting.
  ///
  /// Fresh value: that value and no error. Fresh error: no value and that
  /// error. Otherwise: whatever was last stored of each.
  pub fn raw(&self) -> Raw<T, E> {
    let now = time::now_nanos();
    if let Some(value) = self.fresh_value(now) {
      return Raw {
        value: Some(value),
        error: None,
        fresh: true,
      };
    }
    if let Some(error) = self.fresh_error(now) {
      return Raw {
        value: None,
        error: Some(error),
        fresh: true,
      };
    }
    Raw {
      value: self.value.read().clone(),
      error: self.error.read().clone(),
      fresh: false,
    }
  }

  /// Marks the value stale, then hands the value it held to `hook` (for
  /// example to release resources tied to it) and returns the hook's result.
  pub fn clear_with<A, F>(&self, args: A, hook: F) -> Result<(), E>
  where
    F: FnOnce(RefreshContext<T>, A) -> Result<(), E>,
  {
    let context = self.context();
    self.clear();
    hook(context, args)
  }
}
