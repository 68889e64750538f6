use std::fmt;

/// Errors that can occur when building a cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  /// The cache was configured with a capacity below three entries. The
  /// window/probation/protected partition needs at least one slot each.
  CapacityTooSmall,
  /// The cache was configured with a concurrency level of zero.
  ZeroConcurrency,
  /// Both a fixed time-to-live and a custom expiry calculator were
  /// configured; the cache accepts at most one source of expiry times.
  ConflictingExpiry,
}

impl fmt::Display for BuildError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BuildError::CapacityTooSmall => {
        write!(f, "cache capacity must be at least 3 entries")
      }
      BuildError::ZeroConcurrency => write!(f, "concurrency level cannot be zero"),
      BuildError::ConflictingExpiry => write!(
        f,
        "expire_after_write and a custom expiry calculator cannot both be set"
      ),
    }
  }
}

impl std::error::Error for BuildError {}
