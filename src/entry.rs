use crate::time::NO_EXPIRY;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A container for a value in the cache, holding all necessary metadata.
///
/// The expiration timestamp is atomic so that the read path can refresh
/// it (via the expiry calculator) without taking a write lock; the
/// maintenance pass later reads it to reschedule the timer wheel.
#[derive(Debug)]
pub(crate) struct CacheEntry<V> {
  /// The user's value, wrapped in an Arc for shared ownership.
  value: Arc<V>,
  /// Expiration timestamp in nanoseconds since the cache epoch.
  /// `NO_EXPIRY` means the entry never expires.
  expires_at: AtomicU64,
}

impl<V> CacheEntry<V> {
  pub(crate) fn new(value: V, expires_at: u64) -> Self {
    Self {
      value: Arc::new(value),
      expires_at: AtomicU64::new(expires_at),
    }
  }

  /// Returns a clone of the `Arc` containing the value.
  #[inline]
  pub(crate) fn value(&self) -> Arc<V> {
    self.value.clone()
  }

  #[inline]
  pub(crate) fn value_ref(&self) -> &V {
    &self.value
  }

  #[inline]
  pub(crate) fn expires_at(&self) -> u64 {
    self.expires_at.load(Ordering::Relaxed)
  }

  #[inline]
  pub(crate) fn set_expires_at(&self, nanos: u64) {
    self.expires_at.store(nanos, Ordering::Relaxed);
  }

  /// Checks if the entry's expiry has passed at the given time.
  #[inline]
  pub(crate) fn is_expired(&self, now: u64) -> bool {
    let expires_at = self.expires_at.load(Ordering::Relaxed);
    expires_at != NO_EXPIRY && now >= expires_at
  }
}
