use wtinylfu::{CacheBuilder, Disposer, ForegroundScheduler};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn cache(capacity: usize) -> wtinylfu::Cache<u32, String> {
  CacheBuilder::new(capacity)
    .scheduler(Arc::new(ForegroundScheduler::new()))
    .build()
    .unwrap()
}

#[test]
fn insert_then_get_returns_the_value() {
  let cache = cache(16);
  cache.insert(1, "one".to_string());

  assert_eq!(cache.get(&1).as_deref().map(String::as_str), Some("one"));
  assert!(cache.get(&2).is_none());
  assert_eq!(cache.len(), 1);
}

#[test]
fn get_counts_hits_and_misses() {
  let cache = cache(16);
  cache.insert(1, "one".to_string());

  cache.get(&1);
  cache.get(&1);
  cache.get(&2);

  let metrics = cache.metrics();
  assert_eq!(metrics.hits, 2);
  assert_eq!(metrics.misses, 1);
  assert!((metrics.hit_ratio - 2.0 / 3.0).abs() < 1e-9);
}

#[test]
fn peek_has_no_metric_side_effects() {
  let cache = cache(16);
  cache.insert(1, "one".to_string());

  assert!(cache.peek(&1).is_some());
  assert!(cache.peek(&2).is_none());

  let metrics = cache.metrics();
  assert_eq!(metrics.hits, 0);
  assert_eq!(metrics.misses, 0);
}

#[test]
fn insert_on_an_existing_key_updates_in_place() {
  let cache = cache(16);
  cache.insert(1, "one".to_string());
  cache.insert(1, "uno".to_string());

  assert_eq!(cache.get(&1).as_deref().map(String::as_str), Some("uno"));
  assert_eq!(cache.len(), 1);

  let metrics = cache.metrics();
  assert_eq!(metrics.inserts, 1);
  assert_eq!(metrics.updates, 1);
}

#[test]
fn try_update_only_touches_existing_keys() {
  let cache = cache(16);
  assert!(!cache.try_update(&1, "one".to_string()));
  assert!(cache.is_empty());

  cache.insert(1, "one".to_string());
  assert!(cache.try_update(&1, "uno".to_string()));
  assert_eq!(cache.get(&1).as_deref().map(String::as_str), Some("uno"));
}

#[test]
fn remove_reports_presence() {
  let cache = cache(16);
  cache.insert(1, "one".to_string());

  assert!(cache.remove(&1));
  assert!(!cache.remove(&1));
  assert!(cache.get(&1).is_none());
  assert_eq!(cache.metrics().invalidations, 1);
}

#[test]
fn removed_key_can_be_reinserted() {
  let cache = cache(16);
  cache.insert(1, "one".to_string());
  cache.remove(&1);
  cache.insert(1, "again".to_string());
  cache.run_maintenance();

  assert_eq!(cache.get(&1).as_deref().map(String::as_str), Some("again"));
  assert_eq!(cache.len(), 1);
}

#[test]
fn clear_empties_the_cache() {
  let cache = cache(16);
  for key in 0..10 {
    cache.insert(key, key.to_string());
  }
  cache.clear();

  assert!(cache.is_empty());
  for key in 0..10 {
    assert!(cache.get(&key).is_none());
  }
}

#[test]
fn run_maintenance_is_idempotent_without_buffered_work() {
  let cache = cache(16);
  cache.insert(1, "one".to_string());
  cache.run_maintenance();

  let before = cache.len();
  cache.run_maintenance();
  cache.run_maintenance();
  assert_eq!(cache.len(), before);
}

#[derive(Default)]
struct CountingDisposer {
  disposals: AtomicUsize,
}

impl Disposer<String> for CountingDisposer {
  fn dispose(&self, _value: &String) {
    self.disposals.fetch_add(1, Ordering::Relaxed);
  }
}

#[test]
fn every_dropped_value_is_disposed_exactly_once() {
  let counter = Arc::new(CountingDisposer::default());
  let cache = CacheBuilder::<u32, String>::new(16)
    .scheduler(Arc::new(ForegroundScheduler::new()))
    .disposer(counter.clone())
    .build()
    .unwrap();

  cache.insert(1, "one".to_string());
  cache.insert(1, "uno".to_string()); // replaces: disposes "one"
  cache.remove(&1); // disposes "uno"
  cache.run_maintenance();

  assert_eq!(counter.disposals.load(Ordering::Relaxed), 2);

  cache.insert(2, "two".to_string());
  cache.insert(3, "three".to_string());
  cache.clear(); // disposes both
  assert_eq!(counter.disposals.load(Ordering::Relaxed), 4);
}
