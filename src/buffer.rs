use crate::entry::CacheEntry;

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

/// Capacity of each read-buffer stripe. Reads drop their event once the
/// stripe is full, so this only bounds how much recency information a
/// burst can carry, not correctness.
const READ_STRIPE_CAPACITY: usize = 64;

/// A read stripe at this fill level asks for a maintenance pass.
const READ_STRIPE_DRAIN_THRESHOLD: usize = READ_STRIPE_CAPACITY / 2;

/// Capacity of the bounded write channel. Writers that find it full run
/// an inline maintenance pass instead of losing the event.
pub(crate) const WRITE_BUFFER_CAPACITY: usize = 128;

// Stripes are assigned per thread round-robin; a thread keeps its
// stripe for its lifetime, so steady-state producers do not contend.
static NEXT_STRIPE: AtomicUsize = AtomicUsize::new(0);

thread_local! {
  static THREAD_STRIPE: Cell<usize> = const { Cell::new(usize::MAX) };
}

fn thread_stripe() -> usize {
  THREAD_STRIPE.with(|slot| {
    let mut stripe = slot.get();
    if stripe == usize::MAX {
      stripe = NEXT_STRIPE.fetch_add(1, Ordering::Relaxed);
      slot.set(stripe);
    }
    stripe
  })
}

/// One buffered read event: the key that was hit and the expiry the
/// read path computed for it (`NO_EXPIRY` when the cache has none).
pub(crate) type ReadEvent<K> = (K, u64);

/// A striped, lossy, multi-producer buffer of read events.
///
/// Producers pick a stripe from their thread identity and `try_lock`
/// it: a contended or full stripe simply drops the event. The value was
/// already returned to the caller; only its recency/frequency effect is
/// lost. The maintenance pass drains all stripes in FIFO order.
pub(crate) struct ReadBuffer<K> {
  stripes: Box<[CachePadded<Mutex<Vec<ReadEvent<K>>>>]>,
  mask: usize,
}

impl<K> ReadBuffer<K> {
  /// Creates a buffer with `stripes` rounded up to a power of two.
  pub(crate) fn new(stripes: usize) -> Self {
    let count = stripes.max(1).next_power_of_two();
    let stripes = (0..count)
      .map(|_| CachePadded::new(Mutex::new(Vec::with_capacity(READ_STRIPE_CAPACITY))))
      .collect::<Vec<_>>()
      .into_boxed_slice();
    Self {
      stripes,
      mask: count - 1,
    }
  }

  /// Records a read event. Returns `true` when the stripe is filling up
  /// and the caller should request a maintenance pass.
  pub(crate) fn record(&self, key: K, expires_at: u64) -> bool {
    let stripe = &self.stripes[thread_stripe() & self.mask];
    match stripe.try_lock() {
      Some(mut events) => {
        if events.len() >= READ_STRIPE_CAPACITY {
          // Buffer full: the event is dropped, maintenance is overdue.
          return true;
        }
        events.push((key, expires_at));
        events.len() >= READ_STRIPE_DRAIN_THRESHOLD
      }
      // Contended: the other producer keeps the stripe warm; drop.
      None => false,
    }
  }

  /// Moves every buffered event into `into`. Events within one stripe
  /// stay in FIFO order; no order is guaranteed across stripes.
  pub(crate) fn drain(&self, into: &mut Vec<ReadEvent<K>>) {
    for stripe in self.stripes.iter() {
      let mut events = stripe.lock();
      into.append(&mut events);
    }
  }
}

/// A buffered write event. The map was already mutated synchronously;
/// the maintenance pass applies the structural part and disposes any
/// value the map stopped retaining.
pub(crate) enum WriteOp<K, V> {
  /// A key was inserted into the map.
  Insert { key: K, expires_at: u64 },
  /// An existing key's value was replaced; `old` awaits disposal.
  Update {
    key: K,
    expires_at: u64,
    old: Arc<CacheEntry<V>>,
  },
  /// A key was removed from the map; `old` awaits disposal.
  Remove { key: K, old: Arc<CacheEntry<V>> },
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::time::NO_EXPIRY;

  #[test]
  fn record_then_drain_round_trips_in_order() {
    let buffer: ReadBuffer<u32> = ReadBuffer::new(1);
    buffer.record(1, NO_EXPIRY);
    buffer.record(2, NO_EXPIRY);

    let mut drained = Vec::new();
    buffer.drain(&mut drained);
    let keys: Vec<u32> = drained.into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![1, 2]);
  }

  #[test]
  fn full_stripe_drops_events_and_requests_maintenance() {
    let buffer: ReadBuffer<u32> = ReadBuffer::new(1);
    for i in 0..READ_STRIPE_CAPACITY as u32 {
      buffer.record(i, NO_EXPIRY);
    }
    assert!(buffer.record(999, NO_EXPIRY), "a full stripe must ask for a drain");

    let mut drained = Vec::new();
    buffer.drain(&mut drained);
    assert_eq!(drained.len(), READ_STRIPE_CAPACITY);
    assert!(drained.iter().all(|&(k, _)| k != 999), "overflow event must be dropped");
  }

  #[test]
  fn half_full_stripe_requests_maintenance() {
    let buffer: ReadBuffer<u32> = ReadBuffer::new(1);
    let mut requested = false;
    for i in 0..READ_STRIPE_DRAIN_THRESHOLD as u32 {
      requested = buffer.record(i, NO_EXPIRY);
    }
    assert!(requested);
  }

  #[test]
  fn drain_leaves_the_buffer_reusable() {
    let buffer: ReadBuffer<u32> = ReadBuffer::new(4);
    buffer.record(1, NO_EXPIRY);
    let mut drained = Vec::new();
    buffer.drain(&mut drained);
    assert_eq!(drained.len(), 1);

    buffer.record(2, NO_EXPIRY);
    drained.clear();
    buffer.drain(&mut drained);
    assert_eq!(drained.len(), 1);
  }
}
