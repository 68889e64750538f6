use crate::buffer::WriteOp;
use crate::entry::CacheEntry;
use crate::loader::LoadFuture;
use crate::metrics::MetricsSnapshot;
use crate::shared::CacheShared;
use crate::store::hash_key;
use crate::time::{self, NO_EXPIRY};

use std::fmt;
use std::future::Future;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// A thread-safe, bounded cache with W-TinyLFU admission and optional
/// per-entry expiry.
///
/// All operations are safe to call concurrently from any thread; no
/// caller-side synchronization is ever required. Lookups resolve
/// against the sharded map directly; their effect on recency and
/// frequency bookkeeping is buffered and applied by a later
/// maintenance pass, so the hot path never waits on list mutation.
pub struct Cache<K, V, H = ahash::RandomState> {
  pub(crate) shared: Arc<CacheShared<K, V, H>>,
}

impl<K, V, H> Clone for Cache<K, V, H> {
  /// Makes another handle to the same cache. This is cheap: handles
  /// share all internal state through reference counting.
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<K, V, H> fmt::Debug for Cache<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Cache")
      .field("shared", &self.shared)
      .finish()
  }
}

impl<K, V, H> Cache<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// The number of entries currently resident. Between a burst of
  /// writes and the next maintenance pass this may transiently exceed
  /// the capacity.
  pub fn len(&self) -> usize {
    self.shared.store.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// The configured maximum number of entries.
  pub fn capacity(&self) -> usize {
    self.shared.capacity
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  /// Fetches the value for a key.
  ///
  /// A hit buffers a recency event (dropped, not blocked on, when the
  /// buffer is contended) and returns a clone of the value's `Arc`. A
  /// miss has no side effect beyond the miss counter. An entry whose
  /// expiry has passed is a miss even before maintenance removes it.
  pub fn get(&self, key: &K) -> Option<Arc<V>> {
    match self.read_live(key) {
      Some(value) => Some(value),
      None => {
        self.shared.metrics.misses.fetch_add(1, Ordering::Relaxed);
        None
      }
    }
  }

  /// Fetches without recording the miss; shared by `get` and the
  /// optimistic phase of the load path (which accounts misses itself).
  fn read_live(&self, key: &K) -> Option<Arc<V>> {
    let entry = {
      let guard = self.shared.store.shard(key).read();
      guard.get(key).cloned()
    };

    let now = time::now_nanos();
    match entry {
      Some(entry) if !entry.is_expired(now) => Some(self.on_hit(key, &entry, now)),
      _ => None,
    }
  }

  /// "Peeks" at a value without updating recency, frequency, expiry or
  /// the hit/miss counters.
  pub fn peek(&self, key: &K) -> Option<Arc<V>> {
    let guard = self.shared.store.shard(key).read();
    let entry = guard.get(key)?;
    if entry.is_expired(time::now_nanos()) {
      None
    } else {
      Some(entry.value())
    }
  }

  /// Common bookkeeping for a cache hit: counts it, refreshes the
  /// entry's expiry through the calculator, and buffers the recency
  /// event for the next maintenance pass.
  fn on_hit(&self, key: &K, entry: &Arc<CacheEntry<V>>, now: u64) -> Arc<V> {
    self.shared.metrics.hits.fetch_add(1, Ordering::Relaxed);

    let expires_at = match &self.shared.expiry {
      Some(calculator) => {
        let remaining = Duration::from_nanos(entry.expires_at().saturating_sub(now));
        let after = calculator.expire_after_read(key, entry.value_ref(), remaining);
        let expires_at = now.saturating_add(time::duration_to_nanos(after));
        entry.set_expires_at(expires_at);
        expires_at
      }
      None => NO_EXPIRY,
    };

    if self.shared.read_buffer.record(key.clone(), expires_at) {
      self.shared.request_maintenance();
    }
    entry.value()
  }

  /// Inserts a key-value pair, replacing any existing value. The
  /// replaced value is disposed during the next maintenance pass.
  pub fn insert(&self, key: K, value: V) {
    let now = time::now_nanos();
    let shard = self.shared.store.shard(&key);

    let old = {
      let mut guard = shard.write();
      let previous_expiry = guard.get(&key).map(|entry| entry.expires_at());
      let expires_at = self.expiry_for_write(&key, &value, previous_expiry, now);
      let old = guard.insert(key.clone(), Arc::new(CacheEntry::new(value, expires_at)));
      (old, expires_at)
    };

    match old {
      (Some(old), expires_at) => {
        self.shared.metrics.updates.fetch_add(1, Ordering::Relaxed);
        self.shared.push_write(WriteOp::Update {
          key,
          expires_at,
          old,
        });
      }
      (None, expires_at) => {
        self.shared.metrics.inserts.fetch_add(1, Ordering::Relaxed);
        self.shared.push_write(WriteOp::Insert { key, expires_at });
      }
    }
    self.shared.request_maintenance();
  }

  /// Replaces the value for a key only if it is present. Returns
  /// whether a replacement happened; on `false` the value is dropped.
  pub fn try_update(&self, key: &K, value: V) -> bool {
    let now = time::now_nanos();
    let shard = self.shared.store.shard(key);

    let replaced = {
      let mut guard = shard.write();
      match guard.get(key).map(|entry| entry.expires_at()) {
        Some(previous_expiry) => {
          let expires_at = self.expiry_for_write(key, &value, Some(previous_expiry), now);
          let old = guard.insert(key.clone(), Arc::new(CacheEntry::new(value, expires_at)));
          old.map(|old| (old, expires_at))
        }
        None => None,
      }
    };

    match replaced {
      Some((old, expires_at)) => {
        self.shared.metrics.updates.fetch_add(1, Ordering::Relaxed);
        self.shared.push_write(WriteOp::Update {
          key: key.clone(),
          expires_at,
          old,
        });
        self.shared.request_maintenance();
        true
      }
      None => false,
    }
  }

  /// Removes a key, returning whether it was present. The value is
  /// disposed during the next maintenance pass; removal events are
  /// never dropped.
  pub fn remove(&self, key: &K) -> bool {
    match self.shared.store.remove(key) {
      Some(old) => {
        self
          .shared
          .metrics
          .invalidations
          .fetch_add(1, Ordering::Relaxed);
        self.shared.push_write(WriteOp::Remove {
          key: key.clone(),
          old,
        });
        self.shared.request_maintenance();
        true
      }
      None => false,
    }
  }

  /// Fetches the value for a key, computing and inserting it on a
  /// miss.
  ///
  /// Concurrent callers for the same missing key elect one leader; the
  /// others wait on the leader's result, so the factory runs at most
  /// once per key until the key is next removed. If another insert
  /// beats the factory to the map, the factory's value is discarded
  /// (and disposed) and every caller converges on the retained one.
  pub fn get_or_insert_with<F>(&self, key: K, factory: F) -> Arc<V>
  where
    F: FnOnce(&K) -> V,
  {
    let result: Result<Arc<V>, std::convert::Infallible> =
      self.try_get_or_insert_with(key, |key| Ok(factory(key)));
    match result {
      Ok(value) => value,
      Err(never) => match never {},
    }
  }

  /// Like [`Cache::get_or_insert_with`] for fallible factories. An
  /// error commits nothing: no entry, no buffered event, and waiting
  /// threads re-elect a leader among themselves.
  pub fn try_get_or_insert_with<F, E>(&self, key: K, factory: F) -> Result<Arc<V>, E>
  where
    F: FnOnce(&K) -> Result<V, E>,
  {
    let mut factory = Some(factory);
    loop {
      if let Some(value) = self.read_live(&key) {
        return Ok(value);
      }

      match self.elect_leader(&key) {
        LoadRole::Hit(value) => {
          self.shared.metrics.hits.fetch_add(1, Ordering::Relaxed);
          return Ok(value);
        }
        LoadRole::Waiter(future) => match future.wait_blocking() {
          Some(value) => {
            self.shared.metrics.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
          }
          // The leader failed; try the whole sequence again.
          None => continue,
        },
        LoadRole::Leader(future) => {
          let factory = match factory.take() {
            Some(factory) => factory,
            None => unreachable!("a caller is elected leader at most once"),
          };

          // The one true miss for this load.
          self.shared.metrics.misses.fetch_add(1, Ordering::Relaxed);

          let hash = hash_key(&self.shared.store.hasher, &key);
          let guard = LoadGuard {
            shared: &self.shared,
            key: &key,
            hash,
            future: &future,
          };
          let value = factory(&key)?; // the guard fails waiters on error
          let value = self.commit_loaded(key.clone(), value);
          guard.complete(value.clone());
          return Ok(value);
        }
      }
    }
  }

  /// The async counterpart of [`Cache::get_or_insert_with`]: the
  /// factory returns a future, and waiters await instead of parking.
  /// Cancelling the leader mid-flight fails the load so waiters can
  /// re-elect.
  pub async fn get_or_insert_with_async<F, Fut>(&self, key: K, factory: F) -> Arc<V>
  where
    F: FnOnce(&K) -> Fut,
    Fut: Future<Output = V>,
  {
    let mut factory = Some(factory);
    loop {
      if let Some(value) = self.read_live(&key) {
        return value;
      }

      match self.elect_leader(&key) {
        LoadRole::Hit(value) => {
          self.shared.metrics.hits.fetch_add(1, Ordering::Relaxed);
          return value;
        }
        LoadRole::Waiter(future) => match (&*future).await {
          Some(value) => {
            self.shared.metrics.hits.fetch_add(1, Ordering::Relaxed);
            return value;
          }
          None => continue,
        },
        LoadRole::Leader(future) => {
          let factory = match factory.take() {
            Some(factory) => factory,
            None => unreachable!("a caller is elected leader at most once"),
          };

          self.shared.metrics.misses.fetch_add(1, Ordering::Relaxed);

          let hash = hash_key(&self.shared.store.hasher, &key);
          let guard = LoadGuard {
            shared: &self.shared,
            key: &key,
            hash,
            future: &future,
          };
          let value = factory(&key).await;
          let value = self.commit_loaded(key.clone(), value);
          guard.complete(value.clone());
          return value;
        }
      }
    }
  }

  /// Joins or starts the in-flight load for a key.
  ///
  /// The map re-check under the pending lock closes the race where a
  /// previous leader published its value and retired between this
  /// caller's optimistic read and its election: the value is adopted
  /// instead of electing a second leader, keeping the factory at one
  /// invocation per epoch.
  fn elect_leader(&self, key: &K) -> LoadRole<V> {
    let hash = hash_key(&self.shared.store.hasher, key);
    let mut pending = self.shared.pending_loads_for(hash).lock();
    match pending.get(key) {
      Some(existing) => LoadRole::Waiter(existing.clone()),
      None => match self.shared.store.get(key) {
        Some(entry) => LoadRole::Hit(entry.value()),
        None => {
          let future = Arc::new(LoadFuture::new());
          pending.insert(key.clone(), future.clone());
          LoadRole::Leader(future)
        }
      },
    }
  }

  /// Publishes a freshly computed value, unless a concurrent insert
  /// won the race — then the retained value is adopted and the
  /// candidate is disposed immediately.
  fn commit_loaded(&self, key: K, value: V) -> Arc<V> {
    let now = time::now_nanos();
    let shard = self.shared.store.shard(&key);

    let mut guard = shard.write();
    if let Some(existing) = guard.get(&key) {
      let retained = existing.value();
      drop(guard);
      self.shared.disposer.dispose(&value);
      return retained;
    }

    let expires_at = self.expiry_for_write(&key, &value, None, now);
    let entry = Arc::new(CacheEntry::new(value, expires_at));
    let retained = entry.value();
    guard.insert(key.clone(), entry);
    drop(guard);

    self.shared.metrics.inserts.fetch_add(1, Ordering::Relaxed);
    self.shared.push_write(WriteOp::Insert { key, expires_at });
    self.shared.request_maintenance();
    retained
  }

  /// Computes the expiration timestamp for a create or update.
  fn expiry_for_write(&self, key: &K, value: &V, previous: Option<u64>, now: u64) -> u64 {
    match &self.shared.expiry {
      Some(calculator) => {
        let after = match previous {
          Some(previous) => {
            let remaining = Duration::from_nanos(previous.saturating_sub(now));
            calculator.expire_after_update(key, value, remaining)
          }
          None => calculator.expire_after_create(key, value),
        };
        now.saturating_add(time::duration_to_nanos(after))
      }
      None => NO_EXPIRY,
    }
  }

  /// Runs a synchronous maintenance pass: drains both buffers, applies
  /// every pending event, enforces capacity, and expires due entries.
  /// Idempotent when nothing is buffered.
  pub fn run_maintenance(&self) {
    self.shared.run_maintenance();
  }

  /// The delay until the soonest scheduled expiration, if any entry
  /// has one. Conservative (never later than the true deadline), so a
  /// caller driving `run_maintenance` on a timer can sleep instead of
  /// polling. Always `None` without an expiry configuration.
  pub fn next_expiry_delay(&self) -> Option<Duration> {
    let policy = self.shared.policy.lock();
    let now = time::now_nanos();
    policy
      .wheel
      .as_ref()
      .and_then(|wheel| wheel.next_expiry_delay(now))
      .map(Duration::from_nanos)
  }

  /// Forces a pass, then removes exactly `min(count, len)` entries in
  /// LRU order, coldest segment first.
  pub fn trim(&self, count: usize) {
    self.shared.trim(count);
  }

  /// Forces a pass, then removes every entry, disposing each value.
  pub fn clear(&self) {
    self.shared.clear();
  }
}

/// The role a caller was assigned for one in-flight load.
enum LoadRole<V> {
  Leader(Arc<LoadFuture<V>>),
  Waiter(Arc<LoadFuture<V>>),
  /// The previous leader published between our read and our election.
  Hit(Arc<V>),
}

/// Cleans up after a leader. On the success path `complete` publishes
/// the value; if the leader returns early or its future is dropped
/// mid-await, `Drop` fails the load so waiters re-elect instead of
/// parking forever.
struct LoadGuard<'a, K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  shared: &'a Arc<CacheShared<K, V, H>>,
  key: &'a K,
  hash: u64,
  future: &'a Arc<LoadFuture<V>>,
}

impl<K, V, H> LoadGuard<'_, K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  fn complete(self, value: Arc<V>) {
    self
      .shared
      .pending_loads_for(self.hash)
      .lock()
      .remove(self.key);
    self.future.complete(value);
    std::mem::forget(self);
  }
}

impl<K, V, H> Drop for LoadGuard<'_, K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  fn drop(&mut self) {
    self
      .shared
      .pending_loads_for(self.hash)
      .lock()
      .remove(self.key);
    self.future.fail();
  }
}
