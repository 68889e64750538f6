use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::Mutex;

/// A unit of deferred maintenance work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Decides when and where buffered maintenance runs.
///
/// The cache hands a scheduler small closures that drain its buffers.
/// A scheduler is free to run them inline, on another thread, or not at
/// all: correctness never depends on a scheduled pass, because a full
/// write buffer falls back to an inline pass and `run_maintenance` is
/// always available.
pub trait Scheduler: Send + Sync + 'static {
  /// Submits a job. Implementations may drop it.
  fn schedule(&self, job: Job);

  /// Whether jobs run somewhere other than the submitting thread.
  fn is_background(&self) -> bool {
    false
  }

  /// How many jobs this scheduler has accepted.
  fn run_count(&self) -> u64;

  /// The message of the most recent job panic, for schedulers that run
  /// jobs where the submitter cannot observe one.
  fn last_panic(&self) -> Option<String> {
    None
  }
}

/// Discards every job. Maintenance then only happens inline: on full
/// write buffers, and on explicit `run_maintenance`/`trim`/`clear`.
#[derive(Debug, Default)]
pub struct NullScheduler {
  requests: AtomicU64,
}

impl NullScheduler {
  pub fn new() -> Self {
    Self::default()
  }
}

impl Scheduler for NullScheduler {
  fn schedule(&self, job: Job) {
    self.requests.fetch_add(1, Ordering::Relaxed);
    drop(job);
  }

  fn run_count(&self) -> u64 {
    self.requests.load(Ordering::Relaxed)
  }
}

/// Runs every job inline on the submitting thread. Deterministic, so
/// tests and latency-insensitive callers get immediate maintenance.
#[derive(Debug, Default)]
pub struct ForegroundScheduler {
  runs: AtomicU64,
}

impl ForegroundScheduler {
  pub fn new() -> Self {
    Self::default()
  }
}

impl Scheduler for ForegroundScheduler {
  fn schedule(&self, job: Job) {
    self.runs.fetch_add(1, Ordering::Relaxed);
    job();
  }

  fn run_count(&self) -> u64 {
    self.runs.load(Ordering::Relaxed)
  }
}

/// Spawns a short-lived thread per job. Suits workloads with rare
/// maintenance where keeping a thread parked is not worth it.
#[derive(Debug, Default)]
pub struct ThreadedScheduler {
  runs: AtomicU64,
}

impl ThreadedScheduler {
  pub fn new() -> Self {
    Self::default()
  }
}

impl Scheduler for ThreadedScheduler {
  fn schedule(&self, job: Job) {
    self.runs.fetch_add(1, Ordering::Relaxed);
    thread::spawn(job);
  }

  fn is_background(&self) -> bool {
    true
  }

  fn run_count(&self) -> u64 {
    self.runs.load(Ordering::Relaxed)
  }
}

/// How many submitted-but-unrun jobs the background thread may hold.
/// Maintenance jobs are idempotent, so dropping an overflowing one
/// costs nothing: the next trigger resubmits.
const BACKGROUND_QUEUE_CAPACITY: usize = 16;

/// A dedicated background thread draining a bounded job queue.
///
/// Dropping the scheduler disconnects the queue: no new work is
/// accepted, queued-but-unrun jobs may be abandoned, and the worker
/// thread exits once the queue empties. Callers that need a consistent
/// final state call `run_maintenance` on the cache directly.
pub struct BackgroundScheduler {
  tx: Option<Sender<Job>>,
  runs: Arc<AtomicU64>,
  last_panic: Arc<Mutex<Option<String>>>,
}

impl BackgroundScheduler {
  pub fn new() -> Self {
    let (tx, rx) = bounded::<Job>(BACKGROUND_QUEUE_CAPACITY);
    let runs = Arc::new(AtomicU64::new(0));
    let last_panic = Arc::new(Mutex::new(None));

    let thread_runs = runs.clone();
    let thread_panic = last_panic.clone();
    thread::spawn(move || {
      // Ends when every sender is gone and the queue is drained.
      while let Ok(job) = rx.recv() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(job));
        thread_runs.fetch_add(1, Ordering::Relaxed);
        if let Err(payload) = outcome {
          *thread_panic.lock() = Some(panic_message(&payload));
        }
      }
    });

    Self {
      tx: Some(tx),
      runs,
      last_panic,
    }
  }
}

impl Default for BackgroundScheduler {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Debug for BackgroundScheduler {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BackgroundScheduler")
      .field("runs", &self.runs.load(Ordering::Relaxed))
      .field("stopped", &self.tx.is_none())
      .finish()
  }
}

impl Scheduler for BackgroundScheduler {
  fn schedule(&self, job: Job) {
    let Some(tx) = &self.tx else { return };
    match tx.try_send(job) {
      Ok(()) => {}
      // A full queue already has passes pending; this one is redundant.
      Err(TrySendError::Full(_)) => {}
      Err(TrySendError::Disconnected(_)) => {}
    }
  }

  fn is_background(&self) -> bool {
    true
  }

  fn run_count(&self) -> u64 {
    self.runs.load(Ordering::Relaxed)
  }

  fn last_panic(&self) -> Option<String> {
    self.last_panic.lock().clone()
  }
}

impl Drop for BackgroundScheduler {
  fn drop(&mut self) {
    // Disconnecting the channel lets the worker exit gracefully.
    drop(self.tx.take());
  }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&'static str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "maintenance job panicked".to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicBool;
  use std::time::Duration;

  #[test]
  fn null_scheduler_counts_but_never_runs() {
    let scheduler = NullScheduler::new();
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    scheduler.schedule(Box::new(move || flag.store(true, Ordering::Relaxed)));

    assert_eq!(scheduler.run_count(), 1);
    assert!(!ran.load(Ordering::Relaxed));
  }

  #[test]
  fn foreground_scheduler_runs_inline() {
    let scheduler = ForegroundScheduler::new();
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    scheduler.schedule(Box::new(move || flag.store(true, Ordering::Relaxed)));

    assert!(ran.load(Ordering::Relaxed));
    assert!(!scheduler.is_background());
  }

  #[test]
  fn background_scheduler_runs_on_its_own_thread() {
    let scheduler = BackgroundScheduler::new();
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    scheduler.schedule(Box::new(move || flag.store(true, Ordering::Relaxed)));

    for _ in 0..100 {
      if ran.load(Ordering::Relaxed) {
        break;
      }
      thread::sleep(Duration::from_millis(5));
    }
    assert!(ran.load(Ordering::Relaxed));
    assert_eq!(scheduler.run_count(), 1);
    assert!(scheduler.is_background());
  }

  #[test]
  fn background_scheduler_captures_a_job_panic() {
    let scheduler = BackgroundScheduler::new();
    scheduler.schedule(Box::new(|| panic!("boom")));

    for _ in 0..100 {
      if scheduler.last_panic().is_some() {
        break;
      }
      thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(scheduler.last_panic().as_deref(), Some("boom"));
  }

  #[test]
  fn dropped_background_scheduler_stops_accepting_work() {
    let scheduler = BackgroundScheduler::new();
    drop(scheduler);
    // Nothing to assert beyond "no hang": the worker exits with the
    // channel, and schedule-after-drop is unreachable by construction.
  }
}
