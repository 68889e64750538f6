use std::time::Duration;

/// Supplies per-entry expiration times consumed by the timer wheel.
///
/// Each hook returns the duration after which the entry should expire,
/// measured from the moment of the triggering operation. `remaining` is
/// the time still left on the entry's current expiry, so an
/// implementation can choose to leave it untouched.
pub trait ExpiryCalculator<K, V>: Send + Sync {
  /// Called when a key is inserted for the first time.
  fn expire_after_create(&self, key: &K, value: &V) -> Duration;

  /// Called on a read hit. Returning `remaining` keeps the current
  /// expiry; returning anything else reschedules the entry.
  fn expire_after_read(&self, key: &K, value: &V, remaining: Duration) -> Duration;

  /// Called when an existing key's value is replaced.
  fn expire_after_update(&self, key: &K, value: &V, remaining: Duration) -> Duration;
}

/// Expire-after-write semantics: creation and update reset the clock to
/// a fixed time-to-live, reads leave it untouched.
#[derive(Debug, Clone, Copy)]
pub struct FixedExpiry {
  ttl: Duration,
}

impl FixedExpiry {
  pub fn new(ttl: Duration) -> Self {
    Self { ttl }
  }
}

impl<K, V> ExpiryCalculator<K, V> for FixedExpiry {
  fn expire_after_create(&self, _key: &K, _value: &V) -> Duration {
    self.ttl
  }

  fn expire_after_read(&self, _key: &K, _value: &V, remaining: Duration) -> Duration {
    remaining
  }

  fn expire_after_update(&self, _key: &K, _value: &V, _remaining: Duration) -> Duration {
    self.ttl
  }
}
