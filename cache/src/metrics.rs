use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

#[inline]
fn ratio(hits: u64, misses: u64) -> f64 {
  let total = hits + misses;
  if total == 0 {
    0.0
  } else {
    hits as f64 / total as f64
  }
}

/// A thread-safe, internal metrics collector for a map cache.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub(crate) struct Metrics {
  // --- Hit/Miss Ratios ---
  pub(crate) hits: CachePadded<AtomicU64>,
  pub(crate) misses: CachePadded<AtomicU64>,

  // --- Throughput ---
  pub(crate) inserts: CachePadded<AtomicU64>,
  pub(crate) invalidations: CachePadded<AtomicU64>,

  // --- Eviction Stats ---
  pub(crate) evicted_by_ttl: CachePadded<AtomicU64>,
  pub(crate) cleared: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      hits: CachePadded::new(AtomicU64::new(0)),
      misses: CachePadded::new(AtomicU64::new(0)),
      inserts: CachePadded::new(AtomicU64::new(0)),
      invalidations: CachePadded::new(AtomicU64::new(0)),
      evicted_by_ttl: CachePadded::new(AtomicU64::new(0)),
      cleared: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);

    MetricsSnapshot {
      hits,
      misses,
      hit_ratio: ratio(hits, misses),
      inserts: self.inserts.load(Ordering::Relaxed),
      invalidations: self.invalidations.load(Ordering::Relaxed),
      evicted_by_ttl: self.evicted_by_ttl.load(Ordering::Relaxed),
      cleared: self.cleared.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of a map cache's metrics.
#[derive(Clone)]
pub struct MetricsSnapshot {
  /// The number of lookups that found a live entry.
  pub hits: u64,
  /// The number of lookups that found nothing, or only an expired entry.
  pub misses: u64,
  /// The cache hit ratio (hits / (hits + misses)).
  pub hit_ratio: f64,
  /// The total number of entries written by `store`, `insert` and `load_or_store`.
  pub inserts: u64,
  /// The total number of explicit removals.
  pub invalidations: u64,
  /// The number of entries removed because their TTL ran out.
  pub evicted_by_ttl: u64,
  /// The number of entries removed by `clear()`.
  pub cleared: u64,
  /// The number of seconds the cache has been running.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("hits", &self.hits)
      .field("misses", &self.misses)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("inserts", &self.inserts)
      .field("invalidations", &self.invalidations)
      .field("evicted_by_ttl", &self.evicted_by_ttl)
      .field("cleared", &self.cleared)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}

/// Counters for a single refresh slot.
#[derive(Debug, Default)]
pub(crate) struct RefreshMetrics {
  pub(crate) hits: CachePadded<AtomicU64>,
  pub(crate) error_hits: CachePadded<AtomicU64>,
  pub(crate) refreshes: CachePadded<AtomicU64>,
  pub(crate) failures: CachePadded<AtomicU64>,
}

impl RefreshMetrics {
  pub(crate) fn snapshot(&self) -> RefreshMetricsSnapshot {
    let hits = self.hits.load(Ordering::Relaxed);
    let error_hits = self.error_hits.load(Ordering::Relaxed);
    let refreshes = self.refreshes.load(Ordering::Relaxed);

    RefreshMetricsSnapshot {
      hits,
      error_hits,
      refreshes,
      failures: self.failures.load(Ordering::Relaxed),
      hit_ratio: ratio(hits + error_hits, refreshes),
    }
  }
}

/// A point-in-time snapshot of a refresh cache's counters.
#[derive(Debug, Clone)]
pub struct RefreshMetricsSnapshot {
  /// Reads served from a fresh cached value.
  pub hits: u64,
  /// Reads served from a fresh cached error.
  pub error_hits: u64,
  /// Invocations of the refresh function, successful or not.
  pub refreshes: u64,
  /// Invocations of the refresh function that returned an error.
  pub failures: u64,
  /// Share of reads that did not invoke the refresh function.
  pub hit_ratio: f64,
}
