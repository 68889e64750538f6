/// Receives every value the cache stops retaining.
///
/// `dispose` is called exactly once per removed value, whether the
/// removal was an eviction, an expiry, a manual removal, a replacement
/// by update, or a losing candidate from a racing insert. It runs on
/// the thread performing the maintenance pass (or the removing thread
/// for discarded insert candidates), so it should be quick.
pub trait Disposer<V>: Send + Sync {
  fn dispose(&self, value: &V);
}

/// The default disposer: values are simply dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDisposer;

impl<V> Disposer<V> for NoopDisposer {
  fn dispose(&self, _value: &V) {}
}

impl<V, D: Disposer<V> + ?Sized> Disposer<V> for std::sync::Arc<D> {
  fn dispose(&self, value: &V) {
    (**self).dispose(value)
  }
}
