use fibre_memo::{RefreshCache, RefreshContext, RefreshPolicy};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug)]
struct FeatureFlags {
  revision: u32,
  dark_mode: bool,
}

fn main() {
  // The policy usually comes from the application's own config file.
  let policy: RefreshPolicy = serde_json::from_str(
    r#"{ "max_age": { "ttl": { "secs": 1, "nanos": 0 } }, "error_max_age": { "secs": 0, "nanos": 500000000 } }"#,
  )
  .expect("invalid policy");

  let fetches = Arc::new(AtomicU32::new(0));
  let flags: RefreshCache<FeatureFlags, &'static str, String> = RefreshCache::builder(policy.max_age)
    .error_max_age(policy.error_max_age)
    .refresher({
      let fetches = fetches.clone();
      move |ctx: RefreshContext<FeatureFlags>, environment: &'static str| {
        let revision = fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if revision == 3 {
          return Err(format!("flag service for {environment} unavailable"));
        }
        let previous = ctx.previous().map(|flags| flags.revision);
        println!("fetching flags for {environment} (previous revision {previous:?})");
        Ok(FeatureFlags {
          revision,
          dark_mode: revision % 2 == 0,
        })
      }
    })
    .build()
    .expect("Failed to build cache");

  for _ in 0..5 {
    match flags.get("production") {
      Ok(flags) => println!("flags: {flags:?}"),
      Err(err) => println!("error: {err}"),
    }
    thread::sleep(Duration::from_millis(600));
  }

  let raw = flags.raw();
  println!("\nlast value: {:?}, last error: {:?}", raw.value, raw.error);
  println!("metrics: {:?}", flags.metrics());
}
