/// An approximate frequency counter for the admission policy.
///
/// The table is an array of 64-bit words, each packing sixteen 4-bit
/// saturating counters. A block of 8 words (128 counters) is selected
/// by one mix of the key hash; a second mix picks four counters inside
/// the block, one per sub-row. An estimate is the minimum of the four,
/// so collisions can only inflate it, never deflate it.
///
/// Counters age by periodic halving: once the number of successful
/// increments reaches the sample threshold, every counter is halved and
/// the accumulated size is corrected for the mass lost to truncation.
#[derive(Debug)]
pub(crate) struct FrequencySketch {
  table: Box<[u64]>,
  block_mask: u32,
  sample_size: u32,
  size: u32,
}

impl FrequencySketch {
  /// Creates a sketch sized for the given cache capacity. The table
  /// length is the next power of two at or above the capacity, with a
  /// floor of 8 words so even a zero-capacity sketch stays usable.
  pub(crate) fn new(capacity: usize) -> Self {
    let maximum = capacity.min(i32::MAX as usize / 2);
    let table_len = maximum.next_power_of_two().max(8);

    Self {
      table: vec![0u64; table_len].into_boxed_slice(),
      block_mask: ((table_len >> 3) - 1) as u32,
      sample_size: if maximum == 0 { 10 } else { (10 * maximum) as u32 },
      size: 0,
    }
  }

  /// Folds a 64-bit hash into the 32-bit domain the mixers operate on.
  #[inline]
  fn fold(hash: u64) -> u32 {
    (hash ^ (hash >> 32)) as u32
  }

  /// First mixer: spreads the raw hash bits to pick the block.
  #[inline]
  fn spread(mut x: u32) -> u32 {
    x ^= x >> 17;
    x = x.wrapping_mul(0xed5a_d4bb);
    x ^= x >> 11;
    x = x.wrapping_mul(0xac4c_1b51);
    x ^= x >> 15;
    x
  }

  /// Second mixer: derives the in-block counter selector from the
  /// block hash, decorrelating the two choices.
  #[inline]
  fn rehash(mut x: u32) -> u32 {
    x = x.wrapping_mul(0x3184_8bab);
    x ^= x >> 14;
    x
  }

  /// Records one access for the hashed key, saturating at 15.
  pub(crate) fn increment(&mut self, hash: u64) {
    let block_hash = Self::spread(Self::fold(hash));
    let counter_hash = Self::rehash(block_hash);
    let block = ((block_hash & self.block_mask) << 3) as usize;

    let mut added = false;
    for i in 0..4 {
      let h = counter_hash >> (i << 3);
      let index = ((h >> 1) & 15) as usize;
      let offset = (h & 1) as usize;
      added |= self.try_increment_at(block + offset + (i << 1), index);
    }

    if added {
      self.size += 1;
      if self.size == self.sample_size {
        self.reset();
      }
    }
  }

  /// Increments the `j`-th nibble of word `i` unless it is saturated.
  #[inline]
  fn try_increment_at(&mut self, i: usize, j: usize) -> bool {
    let offset = j << 2;
    let mask = 0xfu64 << offset;
    if self.table[i] & mask != mask {
      self.table[i] += 1 << offset;
      return true;
    }
    false
  }

  /// Estimates the access frequency of the hashed key, in `0..=15`.
  pub(crate) fn estimate(&self, hash: u64) -> u32 {
    let block_hash = Self::spread(Self::fold(hash));
    let counter_hash = Self::rehash(block_hash);
    let block = ((block_hash & self.block_mask) << 3) as usize;

    let mut minimum = u32::MAX;
    for i in 0..4 {
      let h = counter_hash >> (i << 3);
      let index = (h >> 1) & 15;
      let offset = (h & 1) as usize;
      let count = ((self.table[block + offset + (i << 1)] >> (index << 2)) & 0xf) as u32;
      minimum = minimum.min(count);
    }
    minimum
  }

  /// Halves every counter. The mask keeps the halving from borrowing
  /// across nibble boundaries; the size correction subtracts a quarter
  /// of the odd counters, approximating the mass lost to truncation.
  fn reset(&mut self) {
    const ONE_MASK: u64 = 0x1111_1111_1111_1111;
    const HALF_MASK: u64 = 0x7777_7777_7777_7777;

    let mut odd_counters = 0u32;
    for word in self.table.iter_mut() {
      odd_counters += (*word & ONE_MASK).count_ones();
      *word = (*word >> 1) & HALF_MASK;
    }
    self.size = self.size.saturating_sub(odd_counters >> 2) >> 1;
  }

  pub(crate) fn clear(&mut self) {
    self.table.iter_mut().for_each(|word| *word = 0);
    self.size = 0;
  }

  #[cfg(test)]
  pub(crate) fn size(&self) -> u32 {
    self.size
  }

  #[cfg(test)]
  pub(crate) fn sample_size(&self) -> u32 {
    self.sample_size
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use std::hash::{BuildHasher, Hash, Hasher};

  fn hash_of(key: u64) -> u64 {
    // A fixed-seed hasher keeps the tests deterministic across runs.
    let hasher = ahash::RandomState::with_seeds(1, 2, 3, 4);
    let mut state = hasher.build_hasher();
    key.hash(&mut state);
    state.finish()
  }

  #[test]
  fn zero_capacity_still_builds_a_minimum_table() {
    let sketch = FrequencySketch::new(0);
    assert_eq!(sketch.table.len(), 8);
    assert_eq!(sketch.sample_size(), 10);
    assert_eq!(sketch.estimate(hash_of(1)), 0);
  }

  #[test]
  fn table_len_is_next_power_of_two() {
    assert_eq!(FrequencySketch::new(64).table.len(), 64);
    assert_eq!(FrequencySketch::new(100).table.len(), 128);
    assert_eq!(FrequencySketch::new(3).table.len(), 8);
  }

  #[test]
  fn estimates_are_monotonic_and_saturate_at_fifteen() {
    let mut sketch = FrequencySketch::new(512);
    let hash = hash_of(42);

    let mut previous = 0;
    for _ in 0..20 {
      sketch.increment(hash);
      let estimate = sketch.estimate(hash);
      assert!(estimate >= previous, "estimate regressed without a reset");
      assert!(estimate <= 15);
      previous = estimate;
    }
    assert_eq!(sketch.estimate(hash), 15);
  }

  #[test]
  fn estimate_never_underestimates_a_single_key() {
    let mut sketch = FrequencySketch::new(512);
    for key in 0..64u64 {
      sketch.increment(hash_of(key));
    }
    for key in 0..64u64 {
      assert!(sketch.estimate(hash_of(key)) >= 1, "key {} undercounted", key);
    }
  }

  #[test]
  fn heavily_accessed_key_outranks_a_cold_one() {
    let mut sketch = FrequencySketch::new(512);
    for _ in 0..10 {
      sketch.increment(hash_of(7));
    }
    sketch.increment(hash_of(8));
    assert!(sketch.estimate(hash_of(7)) > sketch.estimate(hash_of(8)));
  }

  #[test]
  fn aging_halves_counters_and_shrinks_size() {
    // Capacity 64 gives a sample size of 640. Incrementing 20 * 64
    // distinct keys must trip at least one reset along the way.
    let mut sketch = FrequencySketch::new(64);
    assert_eq!(sketch.sample_size(), 640);

    let mut reset_seen = false;
    for i in 1..=(20 * 64u64) {
      sketch.increment(hash_of(i));
      if sketch.size() != i as u32 {
        reset_seen = true;
      }
    }

    assert!(reset_seen, "no aging event within 1280 increments");
    assert!(
      sketch.size() < sketch.sample_size(),
      "size {} not reduced below the sample threshold",
      sketch.size()
    );
  }

  #[test]
  fn reset_halves_an_individual_estimate() {
    let mut sketch = FrequencySketch::new(64);
    let hot = hash_of(999);
    for _ in 0..15 {
      sketch.increment(hot);
    }
    assert_eq!(sketch.estimate(hot), 15);

    sketch.reset();
    assert!(sketch.estimate(hot) <= 7);
  }

  #[test]
  fn clear_zeroes_everything() {
    let mut sketch = FrequencySketch::new(64);
    for i in 0..100u64 {
      sketch.increment(hash_of(i));
    }
    sketch.clear();
    assert_eq!(sketch.size(), 0);
    for i in 0..100u64 {
      assert_eq!(sketch.estimate(hash_of(i)), 0);
    }
  }
}
