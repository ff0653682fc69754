use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::RwLock;
use tracing::trace;

use super::{Authorizations, SecurityError, Visibility, VisibilityExpr};
use crate::metrics::{EngineMetrics, NoopMetrics};

/// Default number of parsed expressions kept by [`VisibilityEvaluator`].
pub const DEFAULT_VISIBILITY_CACHE_CAPACITY: usize = 1024;

/// Read-permission checker with a bounded cache of parsed expressions.
///
/// Distinct visibility strings are few compared to the facts they label, so
/// each string is parsed once and then evaluated from the cached tree. Lookups
/// take the read lock and use `peek`, so concurrent readers never serialize;
/// the write lock is only taken to insert a freshly parsed expression. Hits do
/// not refresh recency, which makes eviction closer to insertion order.
pub struct VisibilityEvaluator {
    cache: RwLock<LruCache<Visibility, Arc<VisibilityExpr>>>,
    metrics: Arc<dyn EngineMetrics>,
}

impl VisibilityEvaluator {
    /// Creates an evaluator caching up to `capacity` expressions (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self::with_metrics(capacity, Arc::new(NoopMetrics))
    }

    /// Creates an evaluator reporting cache hits and misses to `metrics`.
    pub fn with_metrics(capacity: usize, metrics: Arc<dyn EngineMetrics>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: RwLock::new(LruCache::new(capacity)),
            metrics,
        }
    }

    /// Decides whether `auths` may read data labeled `visibility`.
    pub fn can_read(
        &self,
        visibility: &Visibility,
        auths: &Authorizations,
    ) -> Result<bool, SecurityError> {
        if visibility.is_empty() {
            return Ok(true);
        }
        Ok(self.compiled(visibility)?.evaluate(auths))
    }

    /// Returns the parsed form of `visibility`, parsing on first use.
    pub fn compiled(&self, visibility: &Visibility) -> Result<Arc<VisibilityExpr>, SecurityError> {
        if let Some(expr) = self.cache.read().peek(visibility) {
            self.metrics.visibility_cache(true);
            return Ok(Arc::clone(expr));
        }
        self.metrics.visibility_cache(false);
        let expr = Arc::new(visibility.parse()?);
        trace!(visibility = %visibility, "visibility.cache.insert");
        self.cache.write().put(visibility.clone(), Arc::clone(&expr));
        Ok(expr)
    }

    /// Number of cached expressions.
    pub fn cached_len(&self) -> usize {
        self.cache.read().len()
    }
}

impl Default for VisibilityEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_VISIBILITY_CACHE_CAPACITY)
    }
}
