use fibre_memo::{AsyncRefreshCache, MaxAge};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use tokio::sync::Barrier;
use tokio::time::{sleep, timeout, Duration};

#[tokio::test]
async fn test_async_refresh_basic() {
  let calls = Arc::new(AtomicUsize::new(0));
  let cache: AsyncRefreshCache<String, u32, String> =
    AsyncRefreshCache::builder(Duration::from_secs(60))
      .async_refresher({
        let calls = calls.clone();
        move |_ctx, id: u32| {
          let calls = calls.clone();
          async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("user-{id}"))
          }
        }
      })
      .build_async()
      .unwrap();

  assert_eq!(*cache.get(7).await.unwrap(), "user-7");
  // Fresh: the argument of a later call is not used.
  assert_eq!(*cache.get(8).await.unwrap(), "user-7");
  assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_thundering_herd() {
  let calls = Arc::new(AtomicUsize::new(0));
  let num_tasks = 20;

  let cache: AsyncRefreshCache<usize, (), String> =
    AsyncRefreshCache::builder(Duration::from_secs(60))
      .async_refresher({
        let calls = calls.clone();
        move |_ctx, ()| {
          let calls = calls.clone();
          async move {
            // Simulate a slow upstream call.
            sleep(Duration::from_millis(100)).await;
            Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
          }
        }
      })
      .build_async()
      .unwrap();

  let barrier = Arc::new(Barrier::new(num_tasks));
  let mut handles = Vec::new();
  for _ in 0..num_tasks {
    let cache = cache.clone();
    let barrier = barrier.clone();
    handles.push(tokio::spawn(async move {
      barrier.wait().await;
      *cache.get(()).await.unwrap()
    }));
  }

  for handle in handles {
    assert_eq!(handle.await.unwrap(), 1);
  }
  assert_eq!(calls.load(Ordering::SeqCst), 1, "Refresher should run exactly once");
}

#[tokio::test]
async fn test_async_negative_caching() {
  let calls = Arc::new(AtomicUsize::new(0));
  let cache: AsyncRefreshCache<u32, (), String> = AsyncRefreshCache::builder(MaxAge::Forever)
    .error_max_age(Duration::from_millis(100))
    .async_refresher({
      let calls = calls.clone();
      move |_ctx, ()| {
        let calls = calls.clone();
        async move {
          calls.fetch_add(1, Ordering::SeqCst);
          Err("unavailable".to_string())
        }
      }
    })
    .build_async()
    .unwrap();

  assert_eq!(cache.get(()).await.unwrap_err(), "unavailable");
  assert_eq!(cache.get(()).await.unwrap_err(), "unavailable");
  assert_eq!(calls.load(Ordering::SeqCst), 1);

  sleep(Duration::from_millis(150)).await;
  assert!(cache.get(()).await.is_err());
  assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancelled_refresh_commits_nothing() {
  let calls = Arc::new(AtomicUsize::new(0));
  let cache: AsyncRefreshCache<usize, Duration, String> =
    AsyncRefreshCache::builder(MaxAge::Forever)
      .async_refresher({
        let calls = calls.clone();
        move |_ctx, delay: Duration| {
          let calls = calls.clone();
          async move {
            sleep(delay).await;
            Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
          }
        }
      })
      .build_async()
      .unwrap();

  // The caller gives up while the refresh is still in flight.
  let abandoned = timeout(Duration::from_millis(20), cache.get(Duration::from_secs(10))).await;
  assert!(abandoned.is_err());
  assert!(cache.raw().value.is_none());
  assert!(cache.data().last_success().is_none());
  assert!(cache.data().last_error_at().is_none());

  // The lock was released, so the next caller can refresh.
  let value = timeout(Duration::from_secs(1), cache.get(Duration::ZERO))
    .await
    .expect("lock should have been released")
    .unwrap();
  assert_eq!(*value, 1);
}

#[tokio::test]
async fn test_sync_refresher_on_async_handle() {
  let cache: AsyncRefreshCache<u32, u32, String> = AsyncRefreshCache::builder(MaxAge::ALWAYS_STALE)
    .refresher(|ctx, step: u32| Ok(ctx.previous().copied().unwrap_or(0) + step))
    .build_async()
    .unwrap();

  assert_eq!(*cache.get(1).await.unwrap(), 1);
  assert_eq!(*cache.get(2).await.unwrap(), 3);
  assert_eq!(*cache.refresh(10).await.unwrap(), 13);
}

#[tokio::test]
async fn test_async_set_refresher_switches_strategy() {
  let cache: AsyncRefreshCache<&'static str, (), String> = AsyncRefreshCache::builder(MaxAge::Forever)
    .refresher(|_ctx, ()| Ok("sync"))
    .build_async()
    .unwrap();
  assert_eq!(*cache.get(()).await.unwrap(), "sync");

  cache.set_async_refresher(|_ctx, ()| async { Ok("async") });
  assert_eq!(*cache.refresh(()).await.unwrap(), "async");

  cache.set_refresher(|_ctx, ()| Ok("sync again"));
  cache.clear();
  assert_eq!(*cache.get(()).await.unwrap(), "sync again");
}

#[tokio::test]
async fn test_waiters_share_a_failed_refresh() {
  let calls = Arc::new(AtomicUsize::new(0));
  let cache: AsyncRefreshCache<u32, (), String> = AsyncRefreshCache::builder(MaxAge::Forever)
    .error_max_age(Duration::from_secs(60))
    .async_refresher({
      let calls = calls.clone();
      move |_ctx, ()| {
        let calls = calls.clone();
        async move {
          sleep(Duration::from_millis(50)).await;
          calls.fetch_add(1, Ordering::SeqCst);
          Err("down".to_string())
        }
      }
    })
    .build_async()
    .unwrap();

  let (a, b, c) = tokio::join!(cache.get(()), cache.get(()), cache.get(()));
  assert_eq!(a.unwrap_err(), "down");
  assert_eq!(b.unwrap_err(), "down");
  assert_eq!(c.unwrap_err(), "down");
  assert_eq!(calls.load(Ordering::SeqCst), 1, "Waiters should see the cached error");
}
