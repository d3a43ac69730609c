use fibre_memo::{EvictionReason, MapCache, Sweeper, SweeperConfig};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() {
  // Sweep every 500ms instead of the default 5s so the demo is quick.
  Sweeper::init_global(SweeperConfig {
    interval: Duration::from_millis(500),
  })
  .expect("global sweeper already initialized");

  let sessions: MapCache<String, u64> = MapCache::builder()
    .time_to_live(Duration::from_secs(2))
    .eviction_listener(|key: &String, user: Arc<u64>, reason: EvictionReason| {
      println!("session {key} of user {user} removed: {reason}");
    })
    .build()
    .expect("Failed to build cache");

  sessions.insert("alpha".to_string(), 1);
  sessions.store("beta".to_string(), 2, Duration::from_secs(10));

  // Keep "alpha" alive for a while longer.
  if let Some(entry) = sessions.load(&"alpha".to_string()) {
    entry.add_expiration(Duration::from_secs(1));
    println!("alpha expires in {:?}", entry.time_to_live());
  }

  println!("Waiting for alpha to expire...");
  thread::sleep(Duration::from_secs(4));

  sessions.range(|key, entry| {
    println!("live: {key} -> {} ({:?} left)", entry.value(), entry.time_to_live());
    true
  });

  sessions.clear();
  println!("\nCache metrics: {:#?}", sessions.metrics());
}
