use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Waker};
use std::thread::{self, Thread};

/// A party parked on a `HybridLock`.
enum Waiter {
  Sync(Thread),
  Async(Waker),
}

impl Waiter {
  fn wake(self) {
    match self {
      Waiter::Sync(thread) => thread.unpark(),
      Waiter::Async(waker) => waker.wake(),
    }
  }
}

/// A mutual-exclusion lock that can be acquired both by blocking threads and
/// by async tasks, without blocking the executor thread for the latter.
///
/// The lock guards no data of its own; it serializes critical sections whose
/// state lives in atomics next to it. Because the guard borrows nothing but
/// the lock, it is `Send` and may be held across `.await` points.
#[derive(Debug, Default)]
pub(crate) struct HybridLock {
  locked: AtomicBool,
  waiters: Mutex<VecDeque<Waiter>>,
}

impl std::fmt::Debug for Waiter {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Waiter::Sync(thread) => f.debug_tuple("Sync").field(&thread.id()).finish(),
      Waiter::Async(_) => f.write_str("Async"),
    }
  }
}

impl HybridLock {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub(crate) fn try_lock(&self) -> Option<HybridLockGuard<'_>> {
    self
      .locked
      .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
      .ok()
      .map(|_| HybridLockGuard { lock: self })
  }

  /// Acquires the lock, parking the current thread while it is contended.
  pub(crate) fn lock(&self) -> HybridLockGuard<'_> {
    loop {
      if let Some(guard) = self.try_lock() {
        return guard;
      }

      {
        let mut waiters = self.waiters.lock();
        // Re-check under the waiters lock so an unlock that happened between
        // the first attempt and here cannot be missed.
        if let Some(guard) = self.try_lock() {
          return guard;
        }
        waiters.push_back(Waiter::Sync(thread::current()));
      }

      // Spurious wakeups are harmless, the loop retries.
      thread::park();
    }
  }

  /// Acquires the lock asynchronously.
  ///
  /// Dropping the returned future before it completes leaves the lock untouched.
  pub(crate) fn lock_async(&self) -> LockFuture<'_> {
    LockFuture { lock: self }
  }

  fn unlock(&self) {
    self.locked.store(false, Ordering::Release);

    // Everyone is woken and races for the lock again. Waking a single waiter
    // would lose the hand-off if that waiter was a future dropped before it
    // could be polled.
    let drained: Vec<Waiter> = self.waiters.lock().drain(..).collect();
    for waiter in drained {
      waiter.wake();
    }
  }
}

/// RAII guard for `HybridLock`. Releases the lock and wakes waiters on drop.
#[derive(Debug)]
pub(crate) struct HybridLockGuard<'a> {
  lock: &'a HybridLock,
}

impl Drop for HybridLockGuard<'_> {
  fn drop(&mut self) {
    self.lock.unlock();
  }
}

/// The `Future` returned by `HybridLock::lock_async()`.
#[must_use = "futures do nothing unless you .await or poll them"]
pub(crate) struct LockFuture<'a> {
  lock: &'a HybridLock,
}

impl<'a> Future for LockFuture<'a> {
  type Output = HybridLockGuard<'a>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    // Fast path: Try to acquire the lock without parking.
    if let Some(guard) = self.lock.try_lock() {
      return Poll::Ready(guard);
    }

    let mut waiters = self.lock.waiters.lock();

    // It's possible the lock was released between the `try_lock` call and
    // us acquiring the waiters lock. We must re-check here to avoid a
    // lost wakeup.
    if let Some(guard) = self.lock.try_lock() {
      return Poll::Ready(guard);
    }

    // Still contended. Push our waker to the queue if it's not already there.
    let already_queued = waiters.iter().any(|w| match w {
      Waiter::Async(waker) => waker.will_wake(cx.waker()),
      Waiter::Sync(_) => false,
    });
    if !already_queued {
      waiters.push_back(Waiter::Async(cx.waker().clone()));
    }

    Poll::Pending
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;
  use std::sync::Arc;
  use std::time::Duration;

  #[test]
  fn guard_releases_on_drop() {
    let lock = HybridLock::new();
    let guard = lock.lock();
    assert!(lock.try_lock().is_none());
    drop(guard);
    assert!(lock.try_lock().is_some());
  }

  #[test]
  fn threads_are_mutually_excluded() {
    let lock = Arc::new(HybridLock::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
      .map(|_| {
        let lock = lock.clone();
        let inside = inside.clone();
        let max_inside = max_inside.clone();
        thread::spawn(move || {
          for _ in 0..50 {
            let _guard = lock.lock();
            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
            max_inside.fetch_max(now, Ordering::SeqCst);
            thread::yield_now();
            inside.fetch_sub(1, Ordering::SeqCst);
          }
        })
      })
      .collect();

    for handle in handles {
      handle.join().unwrap();
    }
    assert_eq!(max_inside.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn async_waiter_is_woken_by_sync_holder() {
    let lock = Arc::new(HybridLock::new());
    let held = Arc::new(std::sync::Barrier::new(2));

    let holder = {
      let lock = lock.clone();
      let held = held.clone();
      thread::spawn(move || {
        let _guard = lock.lock();
        held.wait();
        thread::sleep(Duration::from_millis(50));
      })
    };

    // Wait on a blocking thread so the runtime is not stalled.
    let held_wait = held.clone();
    tokio::task::spawn_blocking(move || held_wait.wait())
      .await
      .unwrap();

    let guard = tokio::time::timeout(Duration::from_secs(2), lock.lock_async())
      .await
      .expect("async waiter was never woken");
    drop(guard);
    holder.join().unwrap();
  }

  #[tokio::test]
  async fn dropped_future_does_not_strand_other_waiters() {
    let lock = Arc::new(HybridLock::new());
    let guard = lock.lock();

    // Register a waiter and drop it before it completes.
    let cancelled = tokio::time::timeout(Duration::from_millis(10), lock.lock_async()).await;
    assert!(cancelled.is_err());

    let waiter = {
      let lock = lock.clone();
      tokio::spawn(async move {
        let _guard = lock.lock_async().await;
      })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    drop(guard);

    tokio::time::timeout(Duration::from_secs(2), waiter)
      .await
      .expect("waiter stranded")
      .unwrap();
  }
}
