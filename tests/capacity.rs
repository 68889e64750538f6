use wtinylfu::{CacheBuilder, ForegroundScheduler};

use std::sync::Arc;

fn cache(capacity: usize, concurrency: usize) -> wtinylfu::Cache<u32, u32> {
  CacheBuilder::new(capacity)
    .concurrency_level(concurrency)
    .scheduler(Arc::new(ForegroundScheduler::new()))
    .build()
    .unwrap()
}

#[test]
fn twenty_five_inserts_into_twenty_leave_twenty_and_evict_five() {
  let cache = cache(20, 1);

  for key in 0..25 {
    cache.get_or_insert_with(key, |&key| key * 10);
  }
  cache.run_maintenance();

  assert_eq!(cache.len(), 20);
  assert_eq!(cache.metrics().evicted, 5);
  assert_eq!(cache.metrics().misses, 25);
}

#[test]
fn len_never_exceeds_capacity_after_maintenance() {
  let cache = cache(50, 4);

  for round in 0..10u32 {
    for key in 0..100 {
      cache.insert(round * 100 + key, key);
    }
    cache.run_maintenance();
    assert!(
      cache.len() <= 50,
      "len {} exceeded capacity after maintenance",
      cache.len()
    );
  }
}

#[test]
fn frequently_used_entries_survive_a_scan() {
  let cache = cache(100, 1);

  // Warm a working set well above scan frequency.
  for key in 0..10 {
    cache.insert(key, key);
  }
  for _ in 0..5 {
    for key in 0..10 {
      cache.get(&key);
    }
  }
  cache.run_maintenance();

  // A one-shot scan of 200 cold keys must not displace the warm set.
  for key in 1000..1200 {
    cache.insert(key, key);
  }
  cache.run_maintenance();

  assert!(cache.len() <= 100);
  for key in 0..10 {
    assert!(
      cache.peek(&key).is_some(),
      "warm key {} was displaced by the scan",
      key
    );
  }
  assert!(cache.metrics().rejected > 0, "the scan should have been filtered");
}

#[test]
fn trim_removes_exactly_the_requested_count() {
  let cache = cache(50, 1);
  for key in 0..30 {
    cache.insert(key, key);
  }

  cache.trim(10);
  assert_eq!(cache.len(), 20);

  // Trimming more than the live count empties the cache exactly.
  cache.trim(100);
  assert_eq!(cache.len(), 0);
}

#[test]
fn trim_removes_the_coldest_entries_first() {
  let cache = cache(50, 1);
  for key in 0..20 {
    cache.insert(key, key);
  }
  cache.run_maintenance();

  // Touch everything except the first five, which stay coldest.
  for _ in 0..3 {
    for key in 5..20 {
      cache.get(&key);
    }
  }
  cache.run_maintenance();

  cache.trim(5);
  assert_eq!(cache.len(), 15);
  for key in 5..20 {
    assert!(cache.peek(&key).is_some(), "warm key {} was trimmed", key);
  }
}

#[test]
fn evictions_count_toward_metrics() {
  let cache = cache(20, 1);
  for key in 0..40 {
    cache.insert(key, key);
  }
  cache.run_maintenance();

  let metrics = cache.metrics();
  assert_eq!(cache.len(), 20);
  assert_eq!(metrics.evicted, 20);
  assert_eq!(metrics.inserts, 40);
}
