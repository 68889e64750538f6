use once_cell::sync::Lazy;
use std::time::{Duration, Instant};

// The single, static reference point for all time calculations in the cache.
// It is initialized lazily on its first use.
static CACHE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Sentinel expiration timestamp for entries that never expire.
pub(crate) const NO_EXPIRY: u64 = u64::MAX;

/// The current time as nanoseconds since the cache's epoch.
#[inline]
pub(crate) fn now_nanos() -> u64 {
  Instant::now().saturating_duration_since(*CACHE_EPOCH).as_nanos() as u64
}

/// Converts a `Duration` into a saturating nanosecond count.
///
/// Durations beyond the representable range collapse to `NO_EXPIRY - 1`
/// so they still schedule (into the outermost wheel level) instead of
/// wrapping.
#[inline]
pub(crate) fn duration_to_nanos(duration: Duration) -> u64 {
  let nanos = duration.as_nanos();
  if nanos >= NO_EXPIRY as u128 {
    NO_EXPIRY - 1
  } else {
    nanos as u64
  }
}
