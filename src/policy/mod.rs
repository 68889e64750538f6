pub(crate) mod node;
pub(crate) mod partition;
pub(crate) mod sketch;
pub(crate) mod wheel;

use self::node::{Node, NodeList, Segment};
use self::partition::CapacityPartition;
use self::sketch::FrequencySketch;
use self::wheel::TimerWheel;
use crate::time::NO_EXPIRY;

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};

use generational_arena::{Arena, Index};

/// The outcome of one eviction cycle: the keys that left the cache and
/// how many window candidates were denied admission along the way.
#[derive(Debug, Default)]
pub(crate) struct EvictionBatch<K> {
  pub(crate) victims: Vec<K>,
  pub(crate) rejected: u64,
}

/// The unified mutable policy state: the node arena, the three segment
/// lists, the frequency sketch, the capacity partition and the timer
/// wheel, all guarded by a single lock held only by the thread running
/// a maintenance pass. Readers never touch this state directly; their
/// events arrive through the buffers.
#[derive(Debug)]
pub(crate) struct PolicyState<K, H> {
  nodes: Arena<Node<K>>,
  lookup: HashMap<K, Index, H>,
  window: NodeList,
  probation: NodeList,
  protected: NodeList,
  pub(crate) sketch: FrequencySketch,
  pub(crate) partition: CapacityPartition,
  pub(crate) wheel: Option<TimerWheel>,
}

impl<K, H> PolicyState<K, H>
where
  K: Eq + Hash + Clone,
  H: BuildHasher,
{
  pub(crate) fn new(capacity: usize, hasher: H, wheel: Option<TimerWheel>) -> Self {
    Self {
      nodes: Arena::with_capacity(capacity.min(1 << 20)),
      lookup: HashMap::with_hasher(hasher),
      window: NodeList::new(),
      probation: NodeList::new(),
      protected: NodeList::new(),
      sketch: FrequencySketch::new(capacity),
      partition: CapacityPartition::new(capacity),
      wheel,
    }
  }

  #[inline]
  pub(crate) fn len(&self) -> usize {
    self.lookup.len()
  }

  #[inline]
  fn main_len(&self) -> usize {
    self.probation.len() + self.protected.len()
  }

  /// Applies one drained read event: bumps the sketch, refreshes the
  /// node's recency in its segment (promoting out of probation), and
  /// reschedules its expiry if the read moved it.
  pub(crate) fn apply_read(&mut self, key: &K, hash: u64, expires_at: u64) {
    self.sketch.increment(hash);

    let index = match self.lookup.get(key) {
      Some(&index) => index,
      None => return,
    };

    self.touch(index);
    self.update_expiry(index, expires_at);
  }

  /// Applies one drained insert event. A key that re-appeared before an
  /// earlier buffered removal was applied is treated as a touch.
  pub(crate) fn apply_insert(&mut self, key: K, hash: u64, expires_at: u64) {
    if let Some(&index) = self.lookup.get(&key) {
      self.touch(index);
      self.update_expiry(index, expires_at);
      return;
    }

    self.sketch.increment(hash);
    let index = self.nodes.insert(Node::new(key.clone(), hash, expires_at));
    self.lookup.insert(key, index);
    self.window.push_front(&mut self.nodes, index);

    if expires_at != NO_EXPIRY {
      if let Some(wheel) = &mut self.wheel {
        wheel.schedule(&mut self.nodes, index);
      }
    }
  }

  /// Applies one drained update event: recency plus a new expiry.
  pub(crate) fn apply_update(&mut self, key: K, hash: u64, expires_at: u64) {
    match self.lookup.get(&key) {
      Some(&index) => {
        self.sketch.increment(hash);
        self.touch(index);
        self.update_expiry(index, expires_at);
      }
      // The node was evicted between the map write and this pass.
      None => self.apply_insert(key, hash, expires_at),
    }
  }

  /// Applies one drained removal event. Returns whether a node existed.
  pub(crate) fn apply_remove(&mut self, key: &K) -> bool {
    match self.lookup.get(key) {
      Some(&index) => {
        self.remove_node(index);
        true
      }
      None => false,
    }
  }

  /// Moves a node to the MRU position of its segment; a probation hit
  /// promotes into protected, demoting the protected LRU when the
  /// segment overflows its share.
  fn touch(&mut self, index: Index) {
    match self.nodes[index].segment {
      Segment::Window => self.window.move_to_front(&mut self.nodes, index),
      Segment::Protected => self.protected.move_to_front(&mut self.nodes, index),
      Segment::Probation => {
        self.probation.unlink(&mut self.nodes, index);
        self.nodes[index].segment = Segment::Protected;
        self.protected.push_front(&mut self.nodes, index);
        self.demote_protected_overflow();
      }
    }
  }

  fn demote_protected_overflow(&mut self) {
    while self.protected.len() > self.partition.protected() {
      match self.protected.pop_back(&mut self.nodes) {
        Some(demoted) => {
          self.nodes[demoted].segment = Segment::Probation;
          self.probation.push_front(&mut self.nodes, demoted);
        }
        None => break,
      }
    }
  }

  fn update_expiry(&mut self, index: Index, expires_at: u64) {
    if self.nodes[index].expires_at == expires_at {
      return;
    }
    self.nodes[index].expires_at = expires_at;
    if let Some(wheel) = &mut self.wheel {
      if expires_at == NO_EXPIRY {
        wheel.deschedule(&mut self.nodes, index);
      } else {
        wheel.reschedule(&mut self.nodes, index);
      }
    }
  }

  /// Fully detaches a node (segment list, wheel, lookup, arena) and
  /// returns its key.
  fn remove_node(&mut self, index: Index) -> Option<K> {
    match self.nodes[index].segment {
      Segment::Window => self.window.unlink(&mut self.nodes, index),
      Segment::Probation => self.probation.unlink(&mut self.nodes, index),
      Segment::Protected => self.protected.unlink(&mut self.nodes, index),
    }
    if let Some(wheel) = &mut self.wheel {
      wheel.deschedule(&mut self.nodes, index);
    }
    let node = self.nodes.remove(index)?;
    self.lookup.remove(&node.key);
    Some(node.key)
  }

  /// Restores every segment to its capacity.
  ///
  /// Window overflow turns the window LRU into an admission candidate:
  /// it moves into probation while the main region has room, and
  /// otherwise competes against the probation LRU by sketch estimate.
  /// The candidate wins only on a strictly greater frequency; ties keep
  /// the incumbent. Any remaining overshoot of the total capacity is
  /// shed coldest-first: probation, then protected, then window.
  pub(crate) fn evict_entries(&mut self) -> EvictionBatch<K> {
    let mut batch = EvictionBatch {
      victims: Vec::new(),
      rejected: 0,
    };

    while self.window.len() > self.partition.window() {
      let candidate = match self.window.pop_back(&mut self.nodes) {
        Some(index) => index,
        None => break,
      };

      if self.main_len() < self.partition.main() {
        self.admit_to_probation(candidate);
        continue;
      }

      let victim = self.probation.tail().or_else(|| self.protected.tail());
      match victim {
        None => self.admit_to_probation(candidate),
        Some(victim) => {
          let candidate_freq = self.sketch.estimate(self.nodes[candidate].hash);
          let victim_freq = self.sketch.estimate(self.nodes[victim].hash);
          if candidate_freq > victim_freq {
            if let Some(key) = self.remove_node(victim) {
              batch.victims.push(key);
            }
            self.admit_to_probation(candidate);
          } else {
            batch.rejected += 1;
            if let Some(key) = self.remove_node(candidate) {
              batch.victims.push(key);
            }
          }
        }
      }
    }

    while self.len() > self.partition.total() {
      let coldest = self
        .probation
        .pop_back(&mut self.nodes)
        .or_else(|| self.protected.pop_back(&mut self.nodes))
        .or_else(|| self.window.pop_back(&mut self.nodes));
      match coldest {
        Some(index) => {
          if let Some(key) = self.evict_detached(index) {
            batch.victims.push(key);
          }
        }
        None => break,
      }
    }

    self.demote_protected_overflow();
    batch
  }

  fn admit_to_probation(&mut self, index: Index) {
    self.nodes[index].segment = Segment::Probation;
    self.probation.push_front(&mut self.nodes, index);
  }

  /// Like `remove_node` for an index already popped off its list.
  fn evict_detached(&mut self, index: Index) -> Option<K> {
    if let Some(wheel) = &mut self.wheel {
      wheel.deschedule(&mut self.nodes, index);
    }
    let node = self.nodes.remove(index)?;
    self.lookup.remove(&node.key);
    Some(node.key)
  }

  /// Advances the wheel and fully detaches every due node, returning
  /// their keys so the caller can drop them from the map and dispose
  /// the values. Nothing here runs user code.
  pub(crate) fn expire(&mut self, now: u64) -> Vec<K> {
    let expired = match &mut self.wheel {
      Some(wheel) => wheel.advance(&mut self.nodes, now),
      None => return Vec::new(),
    };

    let mut keys = Vec::with_capacity(expired.len());
    for index in expired {
      // Already off the wheel; detach from its segment and the maps.
      match self.nodes[index].segment {
        Segment::Window => self.window.unlink(&mut self.nodes, index),
        Segment::Probation => self.probation.unlink(&mut self.nodes, index),
        Segment::Protected => self.protected.unlink(&mut self.nodes, index),
      }
      if let Some(node) = self.nodes.remove(index) {
        self.lookup.remove(&node.key);
        keys.push(node.key);
      }
    }
    keys
  }

  /// Removes up to `count` entries coldest-first (probation, then
  /// protected, then window LRU), returning the removed keys in order.
  pub(crate) fn trim(&mut self, count: usize) -> Vec<K> {
    let mut victims = Vec::new();
    for _ in 0..count {
      let coldest = self
        .probation
        .pop_back(&mut self.nodes)
        .or_else(|| self.protected.pop_back(&mut self.nodes))
        .or_else(|| self.window.pop_back(&mut self.nodes));
      match coldest {
        Some(index) => {
          if let Some(key) = self.evict_detached(index) {
            victims.push(key);
          }
        }
        None => break,
      }
    }
    victims
  }

  /// Drops every node and resets the sketch and wheel topology. The
  /// partition and its climber state survive a clear.
  pub(crate) fn clear(&mut self) {
    self.window.clear();
    self.probation.clear();
    self.protected.clear();
    self.lookup.clear();
    self.nodes.clear();
    self.sketch.clear();
    if let Some(wheel) = &mut self.wheel {
      wheel.clear();
    }
  }

  /// Rebalances after a partition change: shrinking the window feeds
  /// candidates through admission, shrinking protected demotes.
  pub(crate) fn rebalance(&mut self) -> EvictionBatch<K> {
    self.evict_entries()
  }

  #[cfg(test)]
  pub(crate) fn segment_of(&self, key: &K) -> Option<Segment> {
    self.lookup.get(key).map(|&index| self.nodes[index].segment)
  }

  #[cfg(test)]
  pub(crate) fn segment_lens(&self) -> (usize, usize, usize) {
    (self.window.len(), self.probation.len(), self.protected.len())
  }
}
