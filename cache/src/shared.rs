use crate::refresh::refresher::ClearHook;
use crate::refresh::{RefreshContext, RefreshData};

use std::fmt;

use parking_lot::RwLock;

/// The internal, thread-safe core of a refresh cache handle.
///
/// `R` is the installed refresh strategy: a plain function for the blocking
/// handle, a [`Refresher`](crate::refresh::refresher::Refresher) for the
/// async one. It is swapped as a whole and read once per operation.
pub(crate) struct RefreshShared<T, A, E, R> {
  pub(crate) data: RefreshData<T, E>,
  refresher: RwLock<R>,
  clear_hook: RwLock<Option<ClearHook<T, A, E>>>,
}

impl<T, A, E, R> fmt::Debug for RefreshShared<T, A, E, R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RefreshShared")
      .field("data", &self.data)
      .field("has_clear_hook", &self.clear_hook.read().is_some())
      .finish_non_exhaustive()
  }
}

impl<T, A, E, R: Clone> RefreshShared<T, A, E, R> {
  pub(crate) fn new(data: RefreshData<T, E>, refresher: R, clear_hook: Option<ClearHook<T, A, E>>) -> Self {
    Self {
      data,
      refresher: RwLock::new(refresher),
      clear_hook: RwLock::new(clear_hook),
    }
  }

  /// The currently installed refresh strategy.
  #[inline]
  pub(crate) fn refresher(&self) -> R {
    self.refresher.read().clone()
  }

  /// Installs a new refresh strategy. Calls already running keep the one
  /// they read.
  pub(crate) fn set_refresher(&self, refresher: R) {
    *self.refresher.write() = refresher;
  }

  pub(crate) fn set_clear_hook(&self, hook: Option<ClearHook<T, A, E>>) {
    *self.clear_hook.write() = hook;
  }

  /// Runs the installed clear hook with the value being cleared, or just
  /// marks the slot stale when none is installed.
  pub(crate) fn clear_with(&self, args: A) -> Result<(), E>
  where
    E: Clone,
  {
    let hook = self.clear_hook.read().clone();
    match hook {
      Some(hook) => self
        .data
        .clear_with(args, |ctx: RefreshContext<T>, args| hook(ctx, args)),
      None => {
        self.data.clear();
        Ok(())
      }
    }
  }
}
