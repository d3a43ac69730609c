use fibre_memo::{AsyncRefreshCache, MaxAge};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() {
  let token: AsyncRefreshCache<String, (), String> = AsyncRefreshCache::builder(Duration::from_secs(30))
    .error_max_age(Duration::from_secs(5))
    .async_refresher(|_ctx, ()| async {
      // Simulate a slow token endpoint.
      sleep(Duration::from_millis(200)).await;
      Ok("token-abc".to_string())
    })
    .build_async()
    .expect("Failed to build cache");

  // Ten concurrent callers, one fetch.
  let mut handles = Vec::new();
  for i in 0..10 {
    let token = token.clone();
    handles.push(tokio::spawn(async move {
      let value = token.get(()).await.expect("token fetch failed");
      println!("task {i} got {value}");
    }));
  }
  for handle in handles {
    handle.await.expect("task panicked");
  }

  println!("metrics: {:?}", token.metrics());
  println!("max age: {:?}", token.data().max_age());
  assert_ne!(token.data().max_age(), MaxAge::Forever);
}
