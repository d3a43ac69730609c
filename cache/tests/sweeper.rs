use fibre_memo::{EvictionReason, MapCache, Sweeper, SweeperConfig, SweeperError, DEFAULT_SWEEP_INTERVAL};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::thread;
use std::time::Duration;

fn fast_sweeper() -> Arc<Sweeper> {
  Sweeper::new(SweeperConfig {
    interval: Duration::from_millis(20),
  })
}

#[test]
fn test_sweeper_removes_unread_entries() {
  let expired = Arc::new(AtomicUsize::new(0));
  let sweeper = fast_sweeper();
  let cache: MapCache<u32, u32> = MapCache::builder()
    .sweeper(sweeper.clone())
    .eviction_listener({
      let expired = expired.clone();
      move |_key: &u32, _value: Arc<u32>, reason: EvictionReason| {
        assert_eq!(reason, EvictionReason::Expired);
        expired.fetch_add(1, Ordering::SeqCst);
      }
    })
    .build()
    .unwrap();

  assert!(sweeper.is_running());
  assert!(cache.is_registered());

  for key in 0..10 {
    cache.store(key, key, Duration::from_millis(10));
  }
  cache.store(100, 100, Duration::from_secs(60));

  // Never read; only the sweeper can remove them.
  thread::sleep(Duration::from_millis(200));
  assert_eq!(cache.len(), 1);
  assert_eq!(expired.load(Ordering::SeqCst), 10);
  assert!(sweeper.ticks() > 0);
}

#[test]
fn test_panicking_listener_does_not_stop_sweeper() {
  let sweeper = fast_sweeper();
  let faulty: MapCache<u32, u32> = MapCache::builder()
    .sweeper(sweeper.clone())
    .eviction_listener(|_key: &u32, _value: Arc<u32>, _reason: EvictionReason| {
      panic!("listener failure");
    })
    .build()
    .unwrap();
  let healthy: MapCache<u32, u32> = MapCache::builder().sweeper(sweeper.clone()).build().unwrap();

  faulty.store(1, 1, Duration::from_millis(5));
  // Let the sweeper hit the panicking listener at least once.
  thread::sleep(Duration::from_millis(100));
  assert!(faulty.is_empty(), "The entry is removed before the listener runs");
  let ticks_after_panic = sweeper.ticks();
  assert!(ticks_after_panic > 0);

  healthy.store(2, 2, Duration::from_millis(5));
  thread::sleep(Duration::from_millis(150));
  assert!(sweeper.ticks() > ticks_after_panic, "The sweeper thread kept ticking");
  assert!(healthy.is_empty(), "The healthy cache is still swept");
  assert!(faulty.is_registered());
}

#[test]
fn test_close_stops_sweeping() {
  let sweeper = fast_sweeper();
  let cache: MapCache<u32, u32> = MapCache::builder().sweeper(sweeper.clone()).build().unwrap();
  cache.close();
  assert!(!cache.is_registered());
  assert_eq!(sweeper.members(), 0);

  cache.store(1, 1, Duration::from_millis(10));
  thread::sleep(Duration::from_millis(100));
  assert_eq!(cache.len(), 1, "A closed cache is not swept");
  // Reads still honor expiry.
  assert!(cache.get(&1).is_none());

  cache.start();
  assert!(cache.is_registered());
  cache.store(2, 2, Duration::from_millis(10));
  thread::sleep(Duration::from_millis(100));
  assert!(cache.is_empty());
}

#[test]
fn test_dropped_cache_leaves_sweeper() {
  let sweeper = Sweeper::new(SweeperConfig {
    interval: Duration::from_secs(3600),
  });
  let cache: MapCache<u32, u32> = MapCache::builder().sweeper(sweeper.clone()).build().unwrap();
  let clone = cache.clone();
  assert_eq!(sweeper.members(), 1);

  drop(cache);
  assert_eq!(sweeper.members(), 1, "A live clone keeps the cache registered");
  drop(clone);
  assert_eq!(sweeper.members(), 0);
}

#[test]
fn test_sweep_now_covers_every_member() {
  let sweeper = Sweeper::new(SweeperConfig {
    interval: Duration::from_secs(3600),
  });
  let caches: Vec<MapCache<u32, u32>> = (0..3)
    .map(|_| MapCache::builder().sweeper(sweeper.clone()).build().unwrap())
    .collect();
  for cache in &caches {
    cache.store(1, 1, Duration::from_millis(5));
    cache.store(2, 2, Duration::from_secs(60));
  }
  thread::sleep(Duration::from_millis(20));

  assert_eq!(sweeper.sweep_now(), 3);
  assert!(caches.iter().all(|cache| cache.len() == 1));
}

#[test]
fn test_global_sweeper_is_shared() {
  // Whichever of init_global/global runs first in this process wins; after
  // that, init_global always fails.
  let _ = Sweeper::init_global(SweeperConfig::default());
  let global = Sweeper::global();
  assert!(Arc::ptr_eq(&global, &Sweeper::global()));
  assert_eq!(
    Sweeper::init_global(SweeperConfig::default()).err(),
    Some(SweeperError::AlreadyInitialized)
  );

  let cache: MapCache<String, u32> = MapCache::new();
  assert!(Arc::ptr_eq(cache.sweeper(), &global));
  assert!(cache.is_registered());
  assert_eq!(global.interval(), DEFAULT_SWEEP_INTERVAL);
}

#[cfg(feature = "serde")]
#[test]
fn test_config_deserialization() {
  use fibre_memo::{MaxAge, RefreshPolicy};

  let config: SweeperConfig = serde_json::from_str(r#"{ "interval": { "secs": 1, "nanos": 0 } }"#).unwrap();
  assert_eq!(config.interval, Duration::from_secs(1));

  let config: SweeperConfig = serde_json::from_str("{}").unwrap();
  assert_eq!(config, SweeperConfig::default());

  let policy: RefreshPolicy = serde_json::from_str(r#"{ "max_age": "forever" }"#).unwrap();
  assert_eq!(policy, RefreshPolicy::new(MaxAge::Forever));

  let policy: RefreshPolicy = serde_json::from_str(
    r#"{ "max_age": { "ttl": { "secs": 30, "nanos": 0 } }, "error_max_age": { "secs": 5, "nanos": 0 } }"#,
  )
  .unwrap();
  assert_eq!(
    policy,
    RefreshPolicy::new(Duration::from_secs(30)).error_max_age(Duration::from_secs(5))
  );
}
