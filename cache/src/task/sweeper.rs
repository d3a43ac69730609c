use crate::error::SweeperError;
use crate::store::ShardedStore;

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The default pause between two sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// The membership set is small and rarely written; a few shards suffice.
const MEMBER_SHARDS: usize = 4;

static GLOBAL: OnceCell<Arc<Sweeper>> = OnceCell::new();
static NEXT_MEMBER_ID: AtomicU64 = AtomicU64::new(1);

/// Something the sweeper can ask to drop its expired entries.
pub(crate) trait Sweep: Send + Sync {
  /// Removes every expired entry and returns how many were removed.
  fn sweep(&self) -> usize;
}

/// Hands out the identity a cache registers under.
pub(crate) fn next_member_id() -> u64 {
  NEXT_MEMBER_ID.fetch_add(1, Ordering::Relaxed)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
  if let Some(message) = payload.downcast_ref::<&'static str>() {
    message
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message
  } else {
    "non-string panic payload"
  }
}

/// Configuration for a [`Sweeper`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SweeperConfig {
  /// Pause between two sweeps.
  pub interval: Duration,
}

impl Default for SweeperConfig {
  fn default() -> Self {
    Self {
      interval: DEFAULT_SWEEP_INTERVAL,
    }
  }
}

/// A background task that periodically removes expired entries from every
/// registered [`MapCache`](crate::MapCache).
///
/// One sweeper serves any number of caches with a single thread. The thread
/// is started lazily, on the first registration, and runs until the sweeper
/// itself is dropped. The process-wide instance returned by
/// [`Sweeper::global`] is never dropped, so its thread lives as long as the
/// process; an idle tick over an empty membership set costs next to nothing.
///
/// Membership holds weak references: a registered cache that is dropped
/// without `close()` is pruned on the next tick.
pub struct Sweeper {
  interval: Duration,
  members: ShardedStore<u64, Weak<dyn Sweep>, ahash::RandomState>,
  started: OnceCell<()>,
  ticks: AtomicU64,
}

impl fmt::Debug for Sweeper {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Sweeper")
      .field("interval", &self.interval)
      .field("members", &self.members())
      .field("ticks", &self.ticks())
      .field("running", &self.is_running())
      .finish()
  }
}

impl Sweeper {
  /// Creates an independent sweeper, to be handed to
  /// [`MapCacheBuilder::sweeper`](crate::MapCacheBuilder::sweeper).
  pub fn new(config: SweeperConfig) -> Arc<Self> {
    Arc::new(Self {
      interval: config.interval,
      members: ShardedStore::new(MEMBER_SHARDS, ahash::RandomState::new()),
      started: OnceCell::new(),
      ticks: AtomicU64::new(0),
    })
  }

  /// The process-wide sweeper, created with the default configuration on
  /// first use unless [`init_global`](Self::init_global) ran before.
  pub fn global() -> Arc<Self> {
    GLOBAL
      .get_or_init(|| Self::new(SweeperConfig::default()))
      .clone()
  }

  /// Creates the process-wide sweeper with a custom configuration.
  ///
  /// Must run before the first map cache is built with the global sweeper.
  /// Fails if the global sweeper already exists.
  pub fn init_global(config: SweeperConfig) -> Result<Arc<Self>, SweeperError> {
    let sweeper = Self::new(config);
    GLOBAL
      .set(sweeper.clone())
      .map_err(|_| SweeperError::AlreadyInitialized)?;
    tracing::debug!(interval = ?config.interval, "global sweeper initialized");
    Ok(sweeper)
  }

  pub fn interval(&self) -> Duration {
    self.interval
  }

  /// The number of registered caches, including dropped ones not yet pruned.
  pub fn members(&self) -> usize {
    self.members.len()
  }

  /// How many sweeps have completed, on the background thread or via
  /// [`sweep_now`](Self::sweep_now).
  pub fn ticks(&self) -> u64 {
    self.ticks.load(Ordering::Relaxed)
  }

  /// Whether the background thread has been started.
  pub fn is_running(&self) -> bool {
    self.started.get().is_some()
  }

  /// Adds a cache to future sweeps and starts the thread if needed.
  pub(crate) fn register(self: &Arc<Self>, id: u64, member: Weak<dyn Sweep>) {
    self.members.store(id, Arc::new(member));
    self.ensure_started();
  }

  /// Removes a cache from future sweeps. A sweep already walking the member
  /// set may still visit it once.
  pub(crate) fn deregister(&self, id: u64) -> bool {
    self.members.load_and_delete(&id).is_some()
  }

  pub(crate) fn is_member(&self, id: u64) -> bool {
    self.members.load(&id).is_some()
  }

  /// Runs one sweep over every registered cache on the calling thread and
  /// returns the number of entries removed.
  ///
  /// A cache whose eviction listener panics is logged and skipped for the
  /// rest of this sweep; the other caches are still swept.
  pub fn sweep_now(&self) -> usize {
    let mut removed = 0;
    self.members.range(|id, member| {
      match member.upgrade() {
        Some(cache) => {
          // A panicking eviction listener must not take the sweep, or the
          // thread running it, down with it.
          match panic::catch_unwind(AssertUnwindSafe(|| cache.sweep())) {
            Ok(count) => removed += count,
            Err(payload) => {
              tracing::error!(
                member = id,
                panic = panic_message(payload.as_ref()),
                "sweeper member panicked"
              );
            }
          }
        }
        None => {
          if self.members.compare_and_delete(id, member) {
            tracing::trace!(member = id, "pruned dropped sweeper member");
          }
        }
      }
      true
    });
    self.ticks.fetch_add(1, Ordering::Relaxed);
    tracing::trace!(removed, members = self.members(), "sweep finished");
    removed
  }

  fn ensure_started(self: &Arc<Self>) {
    let result = self.started.get_or_try_init(|| {
      let sweeper = Arc::downgrade(self);
      let interval = self.interval;
      thread::Builder::new()
        .name("fibre-memo-sweeper".into())
        .spawn(move || Self::run(sweeper, interval))
        .map(|_| tracing::debug!(interval = ?interval, "sweeper thread started"))
    });

    // The gate stays open on failure; the next registration retries.
    if let Err(err) = result {
      tracing::error!(error = %err, "failed to spawn sweeper thread");
    }
  }

  /// The thread body. Holds the sweeper only weakly between ticks so an
  /// independent sweeper can be dropped.
  fn run(sweeper: Weak<Self>, interval: Duration) {
    let mut next_tick = Instant::now() + interval;
    loop {
      thread::sleep(next_tick.saturating_duration_since(Instant::now()));

      match sweeper.upgrade() {
        Some(sweeper) => {
          sweeper.sweep_now();
        }
        None => break,
      }

      // Skip ticks that were missed while sweeping instead of bursting.
      let now = Instant::now();
      next_tick += interval;
      if next_tick < now {
        next_tick = now + interval;
      }
    }
    tracing::debug!("sweeper thread stopped");
  }
}
