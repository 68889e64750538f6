//! A concurrent, bounded, in-process cache engine built around
//! W-TinyLFU admission.
//!
//! # Design
//! - **Frequency-aware eviction**: a Count-Min sketch estimates how
//!   often each key is touched; on overflow, a new entry must beat the
//!   coldest incumbent's frequency to stay, which protects the cache
//!   from scans.
//! - **Segmented main cache**: entries move between a small admission
//!   window and probation/protected segments, with the window size
//!   adapted at runtime by hill-climbing on the observed hit rate.
//! - **Lock-minimizing hot path**: lookups resolve against a sharded
//!   map; recency and frequency bookkeeping is buffered and applied by
//!   a single-writer maintenance pass, so reads never synchronize on
//!   list mutation.
//! - **O(1) expiry**: an optional hierarchical timer wheel schedules
//!   per-entry expirations supplied by a pluggable calculator.
//!
//! ```
//! use wtinylfu::CacheBuilder;
//!
//! let cache = CacheBuilder::<u64, String>::new(1_000).build().unwrap();
//! let value = cache.get_or_insert_with(42, |key| format!("value-{key}"));
//! assert_eq!(value.as_str(), "value-42");
//! ```

// Public modules that form the API
pub mod builder;
pub mod error;
pub mod expiry;
pub mod lifecycle;
pub mod metrics;
pub mod task;

// Internal, crate-only modules
mod buffer;
mod cache;
mod entry;
mod loader;
mod policy;
mod shared;
mod store;
mod time;

// Re-export the primary user-facing types for convenience
pub use builder::CacheBuilder;
pub use cache::Cache;
pub use error::BuildError;
pub use expiry::{ExpiryCalculator, FixedExpiry};
pub use lifecycle::{Disposer, NoopDisposer};
pub use metrics::MetricsSnapshot;
pub use task::scheduler::{
  BackgroundScheduler, ForegroundScheduler, NullScheduler, Scheduler, ThreadedScheduler,
};
