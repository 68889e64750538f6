use crate::buffer::{ReadBuffer, WRITE_BUFFER_CAPACITY};
use crate::cache::Cache;
use crate::error::BuildError;
use crate::expiry::{ExpiryCalculator, FixedExpiry};
use crate::lifecycle::{Disposer, NoopDisposer};
use crate::policy::wheel::TimerWheel;
use crate::policy::PolicyState;
use crate::shared::CacheShared;
use crate::store::ShardedStore;
use crate::task::scheduler::{BackgroundScheduler, Scheduler};
use crate::time;

use core::fmt;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// A builder for [`Cache`] instances.
///
/// ```
/// use wtinylfu::CacheBuilder;
///
/// let cache = CacheBuilder::<u64, String>::new(10_000)
///   .concurrency_level(8)
///   .build()
///   .unwrap();
/// cache.insert(1, "one".to_string());
/// ```
pub struct CacheBuilder<K, V, H = ahash::RandomState> {
  capacity: usize,
  concurrency_level: usize,
  time_to_live: Option<Duration>,
  expiry: Option<Arc<dyn ExpiryCalculator<K, V>>>,
  disposer: Option<Arc<dyn Disposer<V>>>,
  scheduler: Option<Arc<dyn Scheduler>>,
  hasher: H,
}

impl<K, V, H> fmt::Debug for CacheBuilder<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("capacity", &self.capacity)
      .field("concurrency_level", &self.concurrency_level)
      .field("time_to_live", &self.time_to_live)
      .field("has_expiry_calculator", &self.expiry.is_some())
      .field("has_disposer", &self.disposer.is_some())
      .finish_non_exhaustive()
  }
}

impl<K, V, H: BuildHasher + Default> CacheBuilder<K, V, H> {
  /// Creates a builder for a cache bounded to `capacity` entries.
  pub fn new(capacity: usize) -> Self {
    Self {
      capacity,
      concurrency_level: num_cpus::get().max(1),
      time_to_live: None,
      expiry: None,
      disposer: None,
      scheduler: None,
      hasher: H::default(),
    }
  }
}

impl<K, V, H> CacheBuilder<K, V, H> {
  /// Sets the expected level of write concurrency. This sizes the map
  /// shards and the read-buffer stripes; it is rounded up to a power
  /// of two.
  pub fn concurrency_level(mut self, level: usize) -> Self {
    self.concurrency_level = level;
    self
  }

  /// Expires entries a fixed duration after they were written
  /// (inserted or updated). Mutually exclusive with
  /// [`CacheBuilder::expiry_calculator`].
  pub fn expire_after_write(mut self, ttl: Duration) -> Self {
    self.time_to_live = Some(ttl);
    self
  }

  /// Supplies per-entry expiration times. Mutually exclusive with
  /// [`CacheBuilder::expire_after_write`].
  pub fn expiry_calculator<C>(mut self, calculator: C) -> Self
  where
    C: ExpiryCalculator<K, V> + 'static,
  {
    self.expiry = Some(Arc::new(calculator));
    self
  }

  /// Registers a disposer, called exactly once for every value the
  /// cache stops retaining.
  pub fn disposer<D>(mut self, disposer: D) -> Self
  where
    D: Disposer<V> + 'static,
  {
    self.disposer = Some(Arc::new(disposer));
    self
  }

  /// Chooses where deferred maintenance passes run. Defaults to a
  /// dedicated background thread.
  pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
    self.scheduler = Some(scheduler);
    self
  }
}

impl<K, V, H> CacheBuilder<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Sets the hasher shared by the map, the policy lookup and the
  /// frequency sketch.
  pub fn hasher(mut self, hasher: H) -> Self {
    self.hasher = hasher;
    self
  }

  /// Builds the cache, or reports a configuration error. No partially
  /// constructed cache is observable on failure.
  pub fn build(self) -> Result<Cache<K, V, H>, BuildError> {
    self.validate()?;

    let shards = self.concurrency_level.next_power_of_two();
    let store = ShardedStore::new(shards, self.hasher.clone());

    let expiry: Option<Arc<dyn ExpiryCalculator<K, V>>> = match self.time_to_live {
      Some(ttl) => Some(Arc::new(FixedExpiry::new(ttl))),
      None => self.expiry,
    };
    let wheel = expiry
      .is_some()
      .then(|| TimerWheel::new(time::now_nanos()));

    let policy = PolicyState::new(self.capacity, self.hasher.clone(), wheel);
    let read_buffer = ReadBuffer::new(self.concurrency_level * 2);
    let write_channel = crossbeam_channel::bounded(WRITE_BUFFER_CAPACITY);

    let pending_loads = (0..shards)
      .map(|_| Mutex::new(HashMap::with_hasher(self.hasher.clone())))
      .collect::<Vec<_>>()
      .into_boxed_slice();

    let shared = CacheShared::new(
      self.capacity,
      store,
      policy,
      read_buffer,
      write_channel,
      pending_loads,
      expiry,
      self
        .disposer
        .unwrap_or_else(|| Arc::new(NoopDisposer)),
      self
        .scheduler
        .unwrap_or_else(|| Arc::new(BackgroundScheduler::new())),
    );

    Ok(Cache {
      shared: Arc::new(shared),
    })
  }

  /// Validates the builder configuration.
  fn validate(&self) -> Result<(), BuildError> {
    if self.capacity < 3 {
      return Err(BuildError::CapacityTooSmall);
    }
    if self.concurrency_level < 1 {
      return Err(BuildError::ZeroConcurrency);
    }
    if self.time_to_live.is_some() && self.expiry.is_some() {
      return Err(BuildError::ConflictingExpiry);
    }
    Ok(())
  }
}
