use wtinylfu::{CacheBuilder, ForegroundScheduler, NullScheduler};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn concurrent_get_or_insert_runs_the_factory_once() {
  const THREADS: usize = 8;

  let cache = CacheBuilder::<u32, u64>::new(64).build().unwrap();
  let invocations = Arc::new(AtomicUsize::new(0));
  let barrier = Arc::new(Barrier::new(THREADS));

  let handles: Vec<_> = (0..THREADS)
    .map(|_| {
      let cache = cache.clone();
      let invocations = invocations.clone();
      let barrier = barrier.clone();
      thread::spawn(move || {
        barrier.wait();
        cache.get_or_insert_with(7, |_| {
          invocations.fetch_add(1, Ordering::SeqCst);
          12345u64
        })
      })
    })
    .collect();

  let values: Vec<Arc<u64>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

  assert_eq!(invocations.load(Ordering::SeqCst), 1, "factory ran more than once");
  for value in values {
    assert_eq!(*value, 12345);
  }
  assert_eq!(cache.metrics().misses, 1, "only the leader records the miss");
}

#[test]
fn a_failed_factory_commits_nothing_and_a_retry_succeeds() {
  let cache = CacheBuilder::<u32, u32>::new(16)
    .scheduler(Arc::new(ForegroundScheduler::new()))
    .build()
    .unwrap();

  let result: Result<Arc<u32>, &str> = cache.try_get_or_insert_with(1, |_| Err("boom"));
  assert_eq!(result.err(), Some("boom"));
  assert!(cache.is_empty());
  assert!(cache.get(&1).is_none());

  let value = cache.get_or_insert_with(1, |_| 10);
  assert_eq!(*value, 10);
  assert_eq!(cache.len(), 1);
}

#[test]
fn a_waiting_thread_retries_after_the_leader_fails() {
  let cache = CacheBuilder::<u32, u32>::new(16).build().unwrap();
  let barrier = Arc::new(Barrier::new(2));

  let waiter = {
    let cache = cache.clone();
    let barrier = barrier.clone();
    thread::spawn(move || {
      barrier.wait();
      // Whichever caller loses leadership waits, sees the failure, and
      // re-elects; both must converge on a successful value.
      cache.get_or_insert_with(1, |_| 42)
    })
  };

  barrier.wait();
  let _ = cache.try_get_or_insert_with::<_, &str>(1, |_| Err("boom"));
  let value = cache.get_or_insert_with(1, |_| 42);

  assert_eq!(*value, 42);
  assert_eq!(*waiter.join().unwrap(), 42);
}

#[test]
fn async_get_or_insert_shares_one_computation() {
  let cache = CacheBuilder::<u32, u64>::new(64).build().unwrap();

  let value = futures_executor::block_on(async {
    cache
      .get_or_insert_with_async(9, |&key| async move { u64::from(key) * 2 })
      .await
  });
  assert_eq!(*value, 18);

  // The second call is a plain hit; the factory future never runs.
  let value = futures_executor::block_on(async {
    cache
      .get_or_insert_with_async(9, |_| async move { unreachable!("value is cached") })
      .await
  });
  assert_eq!(*value, 18);
}

#[test]
fn writes_survive_a_full_write_buffer() {
  // A null scheduler never drains in the background, so the writers
  // themselves must fall back to inline maintenance when the buffer
  // fills. No write may be lost.
  let cache = CacheBuilder::<u32, u32>::new(64)
    .scheduler(Arc::new(NullScheduler::new()))
    .build()
    .unwrap();

  for key in 0..500 {
    cache.insert(key, key);
  }
  cache.run_maintenance();

  assert_eq!(cache.metrics().inserts, 500);
  assert_eq!(cache.len(), 64, "cache must sit exactly at capacity");
}

#[test]
fn concurrent_mixed_operations_keep_the_cache_bounded() {
  const THREADS: usize = 4;
  const OPS: u32 = 2_000;

  let cache = CacheBuilder::<u32, u32>::new(100)
    .concurrency_level(THREADS)
    .build()
    .unwrap();
  let barrier = Arc::new(Barrier::new(THREADS));

  let handles: Vec<_> = (0..THREADS as u32)
    .map(|thread_id| {
      let cache = cache.clone();
      let barrier = barrier.clone();
      thread::spawn(move || {
        barrier.wait();
        for i in 0..OPS {
          let key = (thread_id * OPS + i) % 500;
          match i % 4 {
            0 => cache.insert(key, i),
            1 => {
              cache.get(&key);
            }
            2 => {
              cache.try_update(&key, i);
            }
            _ => {
              if i % 16 == 3 {
                cache.remove(&key);
              } else {
                cache.get_or_insert_with(key, |_| i);
              }
            }
          }
        }
      })
    })
    .collect();

  for handle in handles {
    handle.join().unwrap();
  }

  cache.run_maintenance();
  assert!(
    cache.len() <= 100,
    "len {} exceeds capacity after a final pass",
    cache.len()
  );

  // Every surviving key must still resolve to a value.
  let metrics = cache.metrics();
  assert!(metrics.hits + metrics.misses > 0);
}
