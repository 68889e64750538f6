use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread::Thread;

use parking_lot::Mutex;

/// Represents a waiter in the queue for a `LoadFuture`.
pub(crate) enum Waiter {
  Sync(Thread),
  Async(Waker),
}

impl Waiter {
  fn wake(self) {
    match self {
      Waiter::Sync(thread) => thread.unpark(),
      Waiter::Async(waker) => waker.wake(),
    }
  }
}

/// The internal state of a value being computed.
pub(crate) enum State<V> {
  Computing,
  Complete(Arc<V>),
  /// The leader's factory failed or was abandoned. Waiters observing
  /// this re-enter leader election rather than caching an error.
  Failed,
}

struct Inner<V> {
  state: State<V>,
  waiters: VecDeque<Waiter>,
}

/// A value being computed for the cache by exactly one "leader" caller.
/// It can be awaited by multiple sync threads and async tasks at once;
/// each gets the same `Arc<V>` on success.
pub(crate) struct LoadFuture<V> {
  inner: Mutex<Inner<V>>,
}

impl<V> LoadFuture<V> {
  /// Creates a new `LoadFuture` in the "Computing" state.
  pub(crate) fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: State::Computing,
        waiters: VecDeque::new(),
      }),
    }
  }

  /// Completes the future with a value, waking all waiters.
  pub(crate) fn complete(&self, value: Arc<V>) {
    let mut inner = self.inner.lock();
    inner.state = State::Complete(value);
    for waiter in inner.waiters.drain(..) {
      waiter.wake();
    }
  }

  /// Marks the computation as failed, waking all waiters so they can
  /// elect a new leader.
  pub(crate) fn fail(&self) {
    let mut inner = self.inner.lock();
    inner.state = State::Failed;
    for waiter in inner.waiters.drain(..) {
      waiter.wake();
    }
  }

  /// Blocks the current thread until the computation settles. Returns
  /// `None` when the leader failed and the caller should retry.
  pub(crate) fn wait_blocking(&self) -> Option<Arc<V>> {
    let mut inner = self.inner.lock();
    loop {
      match &inner.state {
        State::Complete(value) => return Some(value.clone()),
        State::Failed => return None,
        State::Computing => {
          inner.waiters.push_back(Waiter::Sync(std::thread::current()));
          drop(inner); // Unlock before parking.
          std::thread::park();
          inner = self.inner.lock();
        }
      }
    }
  }
}

impl<V> Future for &LoadFuture<V> {
  type Output = Option<Arc<V>>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut inner = self.inner.lock();
    match &inner.state {
      State::Complete(value) => Poll::Ready(Some(value.clone())),
      State::Failed => Poll::Ready(None),
      State::Computing => {
        if !inner
          .waiters
          .iter()
          .any(|w| matches!(w, Waiter::Async(waker) if waker.will_wake(cx.waker())))
        {
          inner.waiters.push_back(Waiter::Async(cx.waker().clone()));
        }
        Poll::Pending
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::thread;
  use std::time::Duration;

  #[test]
  fn complete_wakes_a_parked_waiter() {
    let future = Arc::new(LoadFuture::<u32>::new());
    let waiter = {
      let future = future.clone();
      thread::spawn(move || future.wait_blocking())
    };

    thread::sleep(Duration::from_millis(20));
    future.complete(Arc::new(7));
    assert_eq!(waiter.join().unwrap().as_deref(), Some(&7));
  }

  #[test]
  fn fail_wakes_waiters_with_none() {
    let future = Arc::new(LoadFuture::<u32>::new());
    let waiter = {
      let future = future.clone();
      thread::spawn(move || future.wait_blocking())
    };

    thread::sleep(Duration::from_millis(20));
    future.fail();
    assert!(waiter.join().unwrap().is_none());
  }

  #[test]
  fn async_waiters_resolve_on_completion() {
    let future = Arc::new(LoadFuture::<u32>::new());
    future.complete(Arc::new(3));
    let value = futures_executor::block_on(&*future);
    assert_eq!(value.as_deref(), Some(&3));
  }
}
