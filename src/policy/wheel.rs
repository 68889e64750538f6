use super::node::Node;

use generational_arena::{Arena, Index};

/// Buckets per level. The product of a level's bucket count and span
/// equals the next level's span, so each level covers the full range of
/// the one below it.
const BUCKETS: [usize; 5] = [64, 64, 32, 4, 1];

/// Span per bucket, in nanoseconds, rounded up to powers of two so the
/// bucket index is a shift and a mask: roughly 1.07s, 1.14m, 1.22h,
/// 1.63d and 6.5d per bucket.
const SPANS: [u64; 5] = [1 << 30, 1 << 36, 1 << 42, 1 << 47, 1 << 49];

const SHIFTS: [u32; 5] = [30, 36, 42, 47, 49];

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
  head: Option<Index>,
  tail: Option<Index>,
}

/// A hierarchical timer wheel scheduling entry expirations.
///
/// Nodes are threaded through their dedicated time links, so a node
/// sits in one segment list and at most one wheel bucket at the same
/// time. All operations are O(1) except `advance`, which is amortized
/// O(1) per expired entry.
///
/// The wheel's logical clock only moves in `advance`, and only once a
/// sweep has fully completed, so a failed pass can be retried without
/// skipping unexpired time.
#[derive(Debug)]
pub(crate) struct TimerWheel {
  levels: Box<[Box<[Bucket]>]>,
  nanos: u64,
}

impl TimerWheel {
  pub(crate) fn new(now: u64) -> Self {
    let levels = BUCKETS
      .iter()
      .map(|&count| vec![Bucket::default(); count].into_boxed_slice())
      .collect::<Vec<_>>()
      .into_boxed_slice();
    Self { levels, nanos: now }
  }

  #[cfg(test)]
  pub(crate) fn time(&self) -> u64 {
    self.nanos
  }

  /// Picks the coarsest level whose span still resolves the remaining
  /// duration; anything beyond the representable range lands in the
  /// outermost bucket.
  fn bucket_for(&self, time: u64, due: u64) -> (usize, usize) {
    let duration = due.saturating_sub(time);
    for level in 0..BUCKETS.len() - 1 {
      if duration < SPANS[level + 1] {
        let ticks = due >> SHIFTS[level];
        return (level, ticks as usize & (BUCKETS[level] - 1));
      }
    }
    (BUCKETS.len() - 1, 0)
  }

  /// Inserts a node at the tail of the bucket matching its expiry.
  /// The node must not currently be scheduled.
  pub(crate) fn schedule<K>(&mut self, nodes: &mut Arena<Node<K>>, index: Index) {
    let due = nodes[index].expires_at;
    let (level, slot) = self.bucket_for(self.nanos, due);
    self.link(nodes, index, level, slot);
  }

  fn link<K>(&mut self, nodes: &mut Arena<Node<K>>, index: Index, level: usize, slot: usize) {
    let bucket = &mut self.levels[level][slot];
    let old_tail = bucket.tail;
    {
      let node = &mut nodes[index];
      node.prev_time = old_tail;
      node.next_time = None;
      node.wheel_slot = Some((level, slot));
    }
    match old_tail {
      Some(tail) => nodes[tail].next_time = Some(index),
      None => bucket.head = Some(index),
    }
    bucket.tail = Some(index);
  }

  /// Removes a node from its bucket, if it is scheduled at all.
  pub(crate) fn deschedule<K>(&mut self, nodes: &mut Arena<Node<K>>, index: Index) {
    let (level, slot) = match nodes[index].wheel_slot {
      Some(position) => position,
      None => return,
    };
    let (prev, next) = {
      let node = &mut nodes[index];
      let links = (node.prev_time, node.next_time);
      node.prev_time = None;
      node.next_time = None;
      node.wheel_slot = None;
      links
    };

    let bucket = &mut self.levels[level][slot];
    match prev {
      Some(prev) => nodes[prev].next_time = next,
      None => bucket.head = next,
    }
    match next {
      Some(next) => nodes[next].prev_time = prev,
      None => bucket.tail = prev,
    }
  }

  /// Moves a node to the bucket matching its (updated) expiry.
  pub(crate) fn reschedule<K>(&mut self, nodes: &mut Arena<Node<K>>, index: Index) {
    self.deschedule(nodes, index);
    self.schedule(nodes, index);
  }

  /// Sweeps every bucket that elapsed between the wheel's clock and
  /// `now`, finest level first. Nodes whose due time has passed are
  /// returned detached; nodes that merely cascaded are rescheduled into
  /// a finer bucket relative to `now`. The clock is committed only
  /// after the whole sweep has run.
  ///
  /// Moving backwards sweeps nothing, so a retrograde clock can never
  /// expire an entry early.
  pub(crate) fn advance<K>(&mut self, nodes: &mut Arena<Node<K>>, now: u64) -> Vec<Index> {
    let previous = self.nanos;
    let mut expired = Vec::new();

    for level in 0..BUCKETS.len() {
      let previous_ticks = previous >> SHIFTS[level];
      let current_ticks = now >> SHIFTS[level];
      if current_ticks <= previous_ticks {
        break;
      }

      let mask = BUCKETS[level] - 1;
      let steps = ((current_ticks - previous_ticks) as usize + 1).min(BUCKETS[level]);
      let start = previous_ticks as usize & mask;

      for i in start..start + steps {
        let slot = i & mask;
        let bucket = &mut self.levels[level][slot];
        let mut cursor = bucket.head.take();
        bucket.tail = None;

        while let Some(index) = cursor {
          cursor = {
            let node = &mut nodes[index];
            let next = node.next_time;
            node.prev_time = None;
            node.next_time = None;
            node.wheel_slot = None;
            next
          };

          if nodes[index].expires_at <= now {
            expired.push(index);
          } else {
            // Still pending; cascade into a finer bucket.
            let (next_level, next_slot) = self.bucket_for(now, nodes[index].expires_at);
            self.link(nodes, index, next_level, next_slot);
          }
        }
      }
    }

    self.nanos = now;
    expired
  }

  /// The delay until the soonest scheduled expiration, if any. The
  /// result is conservative (never later than the true deadline), so
  /// schedulers can sleep instead of polling.
  pub(crate) fn next_expiry_delay(&self, now: u64) -> Option<u64> {
    let mut soonest: Option<u64> = None;
    for level in 0..BUCKETS.len() {
      let mask = BUCKETS[level] as u64 - 1;
      let current_tick = now >> SHIFTS[level];
      for offset in 0..BUCKETS[level] as u64 {
        let slot = ((current_tick + offset) & mask) as usize;
        if self.levels[level][slot].head.is_some() {
          // The bucket's window starts at its tick boundary.
          let bucket_start = (current_tick + offset) << SHIFTS[level];
          let delay = bucket_start.saturating_sub(now);
          soonest = Some(soonest.map_or(delay, |d: u64| d.min(delay)));
          break;
        }
      }
    }
    soonest
  }

  pub(crate) fn clear(&mut self) {
    for level in self.levels.iter_mut() {
      for bucket in level.iter_mut() {
        *bucket = Bucket::default();
      }
    }
  }
}
