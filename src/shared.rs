use crate::buffer::{ReadBuffer, WriteOp};
use crate::entry::CacheEntry;
use crate::expiry::ExpiryCalculator;
use crate::lifecycle::Disposer;
use crate::loader::LoadFuture;
use crate::metrics::Metrics;
use crate::policy::{EvictionBatch, PolicyState};
use crate::store::{hash_key, ShardedStore};
use crate::task::scheduler::Scheduler;
use crate::time;

use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;

/// The internal, thread-safe core of the cache.
///
/// The sharded map answers every lookup without touching policy state;
/// policy state lives behind a single mutex that only the thread
/// running a maintenance pass holds. Everything in between flows
/// through the read and write buffers.
pub(crate) struct CacheShared<K, V, H> {
  pub(crate) store: ShardedStore<K, V, H>,
  pub(crate) policy: Mutex<PolicyState<K, H>>,
  pub(crate) read_buffer: ReadBuffer<K>,
  write_tx: Sender<WriteOp<K, V>>,
  write_rx: Receiver<WriteOp<K, V>>,
  pub(crate) metrics: Metrics,
  pub(crate) capacity: usize,
  pub(crate) expiry: Option<Arc<dyn ExpiryCalculator<K, V>>>,
  pub(crate) disposer: Arc<dyn Disposer<V>>,
  pub(crate) scheduler: Arc<dyn Scheduler>,
  /// De-duplicates deferred pass requests between triggers.
  maintenance_requested: AtomicBool,
  /// Per-key in-flight computations, striped by key hash.
  pending_loads: Box<[Mutex<HashMap<K, Arc<LoadFuture<V>>, H>>]>,
}

impl<K, V, H> fmt::Debug for CacheShared<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheShared")
      .field("capacity", &self.capacity)
      .field("len", &self.store.len())
      .field("metrics", &self.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

impl<K, V, H> CacheShared<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  #[allow(clippy::too_many_arguments)]
  pub(crate) fn new(
    capacity: usize,
    store: ShardedStore<K, V, H>,
    policy: PolicyState<K, H>,
    read_buffer: ReadBuffer<K>,
    write_channel: (Sender<WriteOp<K, V>>, Receiver<WriteOp<K, V>>),
    pending_loads: Box<[Mutex<HashMap<K, Arc<LoadFuture<V>>, H>>]>,
    expiry: Option<Arc<dyn ExpiryCalculator<K, V>>>,
    disposer: Arc<dyn Disposer<V>>,
    scheduler: Arc<dyn Scheduler>,
  ) -> Self {
    Self {
      store,
      policy: Mutex::new(policy),
      read_buffer,
      write_tx: write_channel.0,
      write_rx: write_channel.1,
      metrics: Metrics::new(),
      capacity,
      expiry,
      disposer,
      scheduler,
      maintenance_requested: AtomicBool::new(false),
      pending_loads,
    }
  }

  #[inline]
  pub(crate) fn pending_loads_for(&self, hash: u64) -> &Mutex<HashMap<K, Arc<LoadFuture<V>>, H>> {
    &self.pending_loads[hash as usize & (self.pending_loads.len() - 1)]
  }

  /// Enqueues a write event. Writes are never dropped: a full buffer
  /// makes the calling thread run an inline pass to empty it, then
  /// retry the send.
  pub(crate) fn push_write(&self, op: WriteOp<K, V>) {
    let mut op = op;
    loop {
      match self.write_tx.try_send(op) {
        Ok(()) => return,
        Err(TrySendError::Full(returned)) => {
          op = returned;
          self.run_maintenance();
        }
        // The receiver lives in `self`; disconnection is unreachable
        // while the cache exists.
        Err(TrySendError::Disconnected(_)) => return,
      }
    }
  }

  /// Runs a full maintenance pass, waiting for any pass in progress.
  pub(crate) fn run_maintenance(&self) {
    let mut policy = self.policy.lock();
    self.maintain(&mut policy);
  }

  /// Runs a pass only if no other thread is in one; a concurrent pass
  /// is trusted to make progress on our behalf.
  pub(crate) fn try_run_maintenance(&self) {
    if let Some(mut policy) = self.policy.try_lock() {
      self.maintain(&mut policy);
    }
  }

  /// Hands a deferred pass to the scheduler unless one is already
  /// pending.
  pub(crate) fn request_maintenance(self: &Arc<Self>) {
    if self.maintenance_requested.swap(true, Ordering::AcqRel) {
      return;
    }
    let shared = Arc::clone(self);
    self
      .scheduler
      .schedule(Box::new(move || shared.try_run_maintenance()));
  }

  /// One maintenance pass: replay reads, apply writes, enforce
  /// capacity, expire, and adapt the partition — in that order, all
  /// under the policy lock the caller acquired.
  pub(crate) fn maintain(&self, policy: &mut PolicyState<K, H>) {
    // Cleared up front so triggers during the pass request a new one.
    self.maintenance_requested.store(false, Ordering::Release);

    // 1. Replay buffered reads: sketch, recency, refreshed expiries.
    let mut reads = Vec::new();
    self.read_buffer.drain(&mut reads);
    for (key, expires_at) in reads {
      let hash = hash_key(&self.store.hasher, &key);
      policy.apply_read(&key, hash, expires_at);
    }

    // 2. Apply buffered writes in FIFO order. The map is authoritative:
    //    a key that left the map again before this pass gets no node.
    while let Ok(op) = self.write_rx.try_recv() {
      match op {
        WriteOp::Insert { key, expires_at } => {
          if self.store.contains(&key) {
            let hash = hash_key(&self.store.hasher, &key);
            policy.apply_insert(key, hash, expires_at);
          }
        }
        WriteOp::Update {
          key,
          expires_at,
          old,
        } => {
          if self.store.contains(&key) {
            let hash = hash_key(&self.store.hasher, &key);
            policy.apply_update(key, hash, expires_at);
          }
          self.disposer.dispose(old.value_ref());
        }
        WriteOp::Remove { key, old } => {
          // Only drop the node while the map agrees the key is gone: a
          // newer insert for the same key may have drained first, and
          // its node must survive this stale removal.
          if !self.store.contains(&key) {
            policy.apply_remove(&key);
          }
          self.disposer.dispose(old.value_ref());
        }
      }
    }

    // 3. Enforce segment capacities via admission.
    let batch = policy.evict_entries();
    self.discard_victims(batch);

    // 4. Expire due entries. Every expired node is fully unlinked
    //    before the first disposer runs.
    if policy.wheel.is_some() {
      let now = time::now_nanos();
      for key in policy.expire(now) {
        match self.remove_if_expired(&key, now) {
          Some(entry) => {
            self.metrics.expired.fetch_add(1, Ordering::Relaxed);
            self.disposer.dispose(entry.value_ref());
          }
          None => {
            // A read refreshed the entry after its node was scheduled
            // (the node's deadline lagged the entry's). Give the live
            // entry a fresh node so it stays tracked.
            if let Some(entry) = self.store.get(&key) {
              let hash = hash_key(&self.store.hasher, &key);
              policy.apply_insert(key, hash, entry.expires_at());
            }
          }
        }
      }
    }

    // 5. Adapt the window split from the accumulated counters.
    let hits = self.metrics.hits.load(Ordering::Relaxed);
    let misses = self.metrics.misses.load(Ordering::Relaxed);
    if policy.partition.climb(hits, misses) {
      let batch = policy.rebalance();
      self.discard_victims(batch);
    }
  }

  fn discard_victims(&self, batch: EvictionBatch<K>) {
    self
      .metrics
      .rejected
      .fetch_add(batch.rejected, Ordering::Relaxed);
    for key in batch.victims {
      if let Some(entry) = self.store.remove(&key) {
        self.metrics.evicted.fetch_add(1, Ordering::Relaxed);
        self.disposer.dispose(entry.value_ref());
      }
    }
  }

  /// Removes a key only while its entry is still past due, so an entry
  /// freshly re-inserted under the same key survives the stale expiry.
  fn remove_if_expired(&self, key: &K, now: u64) -> Option<Arc<CacheEntry<V>>> {
    let mut guard = self.store.shard(key).write();
    if guard.get(key).is_some_and(|entry| entry.is_expired(now)) {
      guard.remove(key)
    } else {
      None
    }
  }

  /// Forces a pass, then removes up to `count` entries coldest-first.
  pub(crate) fn trim(&self, count: usize) {
    let mut policy = self.policy.lock();
    self.maintain(&mut policy);
    for key in policy.trim(count) {
      if let Some(entry) = self.store.remove(&key) {
        self.metrics.evicted.fetch_add(1, Ordering::Relaxed);
        self.disposer.dispose(entry.value_ref());
      }
    }
  }

  /// Forces a pass, then empties every structure, disposing each value
  /// exactly once.
  pub(crate) fn clear(&self) {
    let mut policy = self.policy.lock();
    self.maintain(&mut policy);
    policy.clear();
    for shard in self.store.iter_shards() {
      let mut guard = shard.write();
      for (_key, entry) in guard.drain() {
        self.disposer.dispose(entry.value_ref());
      }
    }
  }
}
