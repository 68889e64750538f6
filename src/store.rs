use crate::entry::CacheEntry;

use core::fmt;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;

/// A helper function to hash a key using a `BuildHasher`.
#[inline]
pub(crate) fn hash_key<K: Hash + ?Sized, H: BuildHasher>(hasher: &H, key: &K) -> u64 {
  hasher.hash_one(key)
}

type Shard<K, V, H> = RwLock<HashMap<K, Arc<CacheEntry<V>>, H>>;

/// A cache store that is partitioned into multiple, independently
/// locked shards. The map is the authority on which keys are present;
/// the policy state only ever lags it by buffered events.
pub(crate) struct ShardedStore<K, V, H> {
  shards: Box<[CachePadded<Shard<K, V, H>>]>,
  pub(crate) hasher: H,
}

impl<K, V, H> fmt::Debug for ShardedStore<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ShardedStore")
      .field("num_shards", &self.shards.len())
      .finish()
  }
}

impl<K, V, H> ShardedStore<K, V, H> {
  /// Returns an iterator over all the shard locks, for stop-the-world
  /// operations like `clear`.
  pub(crate) fn iter_shards(&self) -> impl Iterator<Item = &Shard<K, V, H>> {
    self.shards.iter().map(|padded| &**padded)
  }

  /// The number of live entries, summed across shards. Concurrent
  /// writers can make this momentarily stale, never torn.
  pub(crate) fn len(&self) -> usize {
    self.iter_shards().map(|shard| shard.read().len()).sum()
  }
}

impl<K, V, H> ShardedStore<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  /// Creates a store with `num_shards` rounded up to a power of two so
  /// shard selection is a mask of the key hash.
  pub(crate) fn new(num_shards: usize, hasher: H) -> Self {
    let count = num_shards.max(1).next_power_of_two();
    let shards = (0..count)
      .map(|_| CachePadded::new(RwLock::new(HashMap::with_hasher(hasher.clone()))))
      .collect::<Vec<_>>()
      .into_boxed_slice();

    Self { shards, hasher }
  }

  /// Returns the lock guarding the shard for an already-computed hash.
  #[inline]
  pub(crate) fn shard_for_hash(&self, hash: u64) -> &Shard<K, V, H> {
    &self.shards[hash as usize & (self.shards.len() - 1)]
  }

  /// Returns the lock guarding the shard for a given key.
  #[inline]
  pub(crate) fn shard(&self, key: &K) -> &Shard<K, V, H> {
    self.shard_for_hash(hash_key(&self.hasher, key))
  }

  /// Whether the map currently holds the key.
  #[inline]
  pub(crate) fn contains(&self, key: &K) -> bool {
    self.shard(key).read().contains_key(key)
  }

  /// Returns the entry for a key, if one is present.
  pub(crate) fn get(&self, key: &K) -> Option<Arc<CacheEntry<V>>> {
    self.shard(key).read().get(key).cloned()
  }

  /// Removes a key, returning its entry if one was present.
  pub(crate) fn remove(&self, key: &K) -> Option<Arc<CacheEntry<V>>> {
    self.shard(key).write().remove(key)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::time::NO_EXPIRY;

  fn store() -> ShardedStore<u32, String, ahash::RandomState> {
    ShardedStore::new(4, ahash::RandomState::new())
  }

  #[test]
  fn insert_and_lookup_through_the_shard_lock() {
    let store = store();
    let entry = Arc::new(CacheEntry::new("value".to_string(), NO_EXPIRY));
    store.shard(&1).write().insert(1, entry);

    assert!(store.contains(&1));
    assert_eq!(store.len(), 1);
    let found = store.shard(&1).read().get(&1).map(|e| e.value());
    assert_eq!(found.as_deref().map(String::as_str), Some("value"));
  }

  #[test]
  fn remove_returns_the_entry_exactly_once() {
    let store = store();
    let entry = Arc::new(CacheEntry::new("value".to_string(), NO_EXPIRY));
    store.shard(&1).write().insert(1, entry);

    assert!(store.remove(&1).is_some());
    assert!(store.remove(&1).is_none());
    assert_eq!(store.len(), 0);
  }

  #[test]
  fn shard_count_rounds_up_to_a_power_of_two() {
    let store: ShardedStore<u32, u32, ahash::RandomState> =
      ShardedStore::new(3, ahash::RandomState::new());
    assert_eq!(store.shards.len(), 4);
  }
}
