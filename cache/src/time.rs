use once_cell::sync::Lazy;
use std::time::{Duration, Instant};

// The single, static reference point for all timestamps in the crate.
// It is initialized lazily on its first use.
static CACHE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Converts a `Duration` into nanoseconds, clamping to `u64::MAX`.
#[inline]
pub(crate) fn duration_to_nanos(duration: Duration) -> u64 {
  u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Converts an `Instant` into nanoseconds since the epoch.
///
/// Instants before the epoch saturate to zero.
#[inline]
pub(crate) fn instant_to_nanos(instant: Instant) -> u64 {
  duration_to_nanos(instant.saturating_duration_since(*CACHE_EPOCH))
}

/// Converts nanoseconds since the epoch back into an `Instant`.
///
/// Timestamps too far in the future to be represented saturate to `None`.
#[inline]
pub(crate) fn nanos_to_instant(nanos: u64) -> Option<Instant> {
  CACHE_EPOCH.checked_add(Duration::from_nanos(nanos))
}

/// The current time as nanoseconds since the epoch.
#[inline]
pub(crate) fn now_nanos() -> u64 {
  instant_to_nanos(Instant::now())
}

/// The current time as a non-zero stamp.
///
/// Zero is reserved to mean "never happened" for the refresh bookkeeping.
#[inline]
pub(crate) fn now_stamp() -> u64 {
  now_nanos().max(1)
}

/// Absolute deadline `ttl` from now, saturating at `u64::MAX` ("never").
#[inline]
pub(crate) fn deadline_after(ttl: Duration) -> u64 {
  now_nanos().saturating_add(duration_to_nanos(ttl))
}
