/// Errors that can occur when building a cache.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
  /// A refresh cache was built without a refresh function. There is nothing
  /// it could ever serve, so this is rejected up front instead of on first use.
  #[error("a refresh cache requires a refresh function")]
  MissingRefresher,
  /// An async refresh function was installed, but a blocking `RefreshCache`
  /// was requested. Use `build_async()` instead.
  #[error("an async refresh function can only drive an AsyncRefreshCache")]
  AsyncRefresher,
  /// The map cache was configured with zero shards, which is not allowed.
  #[error("shard count cannot be zero")]
  ZeroShards,
}

/// Errors raised by the process-wide sweeper.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SweeperError {
  /// `Sweeper::init_global` was called after the global sweeper already existed,
  /// either from an earlier `init_global` or implicitly by `Sweeper::global()`.
  #[error("the global sweeper is already initialized")]
  AlreadyInitialized,
}
