//! Engine activity counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for tracking engine activity.
///
/// Implementations collect counts of appended mutations, replays, and
/// visibility checks for monitoring and profiling.
pub trait EngineMetrics: Send + Sync {
    /// Records a batch of mutations appended for one element.
    fn mutations_appended(&self, count: usize);

    /// Records one materialization.
    ///
    /// # Parameters
    /// * `found` - Whether an element was returned (`false` for not-found/deleted/unreadable).
    fn element_materialized(&self, found: bool);

    /// Records the outcome of one history reconstruction.
    ///
    /// # Parameters
    /// * `emitted` - Events produced before post-filtering.
    /// * `suppressed` - Snapshot and projection mutations collapsed by deduplication.
    fn history_reconstructed(&self, emitted: usize, suppressed: usize);

    /// Records mutations skipped because the caller could not read them.
    fn mutations_hidden(&self, count: usize);

    /// Records a visibility cache lookup.
    fn visibility_cache(&self, hit: bool);
}

/// A no-op implementation of [`EngineMetrics`].
#[derive(Default)]
pub struct NoopMetrics;

impl EngineMetrics for NoopMetrics {
    fn mutations_appended(&self, _count: usize) {}
    fn element_materialized(&self, _found: bool) {}
    fn history_reconstructed(&self, _emitted: usize, _suppressed: usize) {}
    fn mutations_hidden(&self, _count: usize) {}
    fn visibility_cache(&self, _hit: bool) {}
}

/// A thread-safe counter-based implementation of [`EngineMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Mutations appended across all elements.
    pub mutations_appended: AtomicU64,

    /// Materializations that returned an element.
    pub elements_found: AtomicU64,

    /// Materializations that returned nothing.
    pub elements_missing: AtomicU64,

    /// Historical events emitted before post-filtering.
    pub events_emitted: AtomicU64,

    /// Snapshot/projection mutations suppressed during reconstruction.
    pub events_suppressed: AtomicU64,

    /// Mutations skipped because their visibility was unreadable.
    pub mutations_hidden: AtomicU64,

    /// Visibility cache hits.
    pub visibility_cache_hits: AtomicU64,

    /// Visibility cache misses.
    pub visibility_cache_misses: AtomicU64,
}

impl EngineMetrics for CounterMetrics {
    fn mutations_appended(&self, count: usize) {
        self.mutations_appended
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    fn element_materialized(&self, found: bool) {
        if found {
            self.elements_found.fetch_add(1, Ordering::Relaxed);
        } else {
            self.elements_missing.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn history_reconstructed(&self, emitted: usize, suppressed: usize) {
        self.events_emitted
            .fetch_add(emitted as u64, Ordering::Relaxed);
        self.events_suppressed
            .fetch_add(suppressed as u64, Ordering::Relaxed);
    }

    fn mutations_hidden(&self, count: usize) {
        self.mutations_hidden
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    fn visibility_cache(&self, hit: bool) {
        if hit {
            self.visibility_cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.visibility_cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Returns the default metrics sink.
pub fn default_metrics() -> Arc<dyn EngineMetrics> {
    Arc::new(NoopMetrics)
}
