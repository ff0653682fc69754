//! The caller-facing engine: reads, history and writes over one store.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::clock::TimestampOracle;
use crate::config::EngineConfig;
use crate::fetch_hints::{FetchHints, HistoricalEventsFetchHints};
use crate::history::reconstruct::reconstruct;
use crate::history::{HistoricalEvent, HistoricalEventId};
use crate::materialize::{fold_edge_projections, materialize, ReplayContext};
use crate::metrics::{default_metrics, EngineMetrics};
use crate::model::{EdgeInfo, Element, ElementLocation};
use crate::mutation::{DeleteMode, MutationOp};
use crate::security::{
    Authorizations, User, Visibility, VisibilityEvaluator, DEFAULT_VISIBILITY_CACHE_CAPACITY,
};
use crate::store::{ElementBatch, MemoryStore, MutationStore, StoreRegistry};
use crate::types::{Direction, ElementId, ElementType, PenumbraError, Result, Timestamp};
use crate::write::{self, ElementMutation, SnapshotMarkers};

/// Configuration options supplied when opening a [`Graph`].
#[derive(Clone)]
pub struct GraphOptions {
    /// Mutation log backend.
    pub store: Arc<dyn MutationStore>,
    /// Optional metrics sink; defaults to a no-op.
    pub metrics: Option<Arc<dyn EngineMetrics>>,
    /// Shared timestamp source; defaults to a fresh oracle seeded from the store.
    pub clock: Option<Arc<TimestampOracle>>,
    /// Parsed visibility expressions kept in the evaluator cache.
    pub visibility_cache_capacity: usize,
    /// Fail reads whose log has writes after a delete without re-create.
    pub strict_invariants: bool,
    /// Reject writes labeled with visibilities the writer cannot read.
    pub enforce_write_visibility: bool,
    /// Snapshot marker cadence for writers.
    pub snapshot_markers: SnapshotMarkers,
}

impl GraphOptions {
    /// Creates options with default settings over `store`.
    pub fn new(store: Arc<dyn MutationStore>) -> Self {
        Self {
            store,
            metrics: None,
            clock: None,
            visibility_cache_capacity: DEFAULT_VISIBILITY_CACHE_CAPACITY,
            strict_invariants: true,
            enforce_write_visibility: true,
            snapshot_markers: SnapshotMarkers::default(),
        }
    }

    /// Sets the metrics collection implementation.
    pub fn metrics(mut self, metrics: Arc<dyn EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Shares a timestamp oracle with other writers.
    pub fn clock(mut self, clock: Arc<TimestampOracle>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the visibility cache capacity.
    pub fn visibility_cache_capacity(mut self, capacity: usize) -> Self {
        self.visibility_cache_capacity = capacity;
        self
    }

    /// Enables or disables delete invariant checks on read.
    pub fn strict_invariants(mut self, strict: bool) -> Self {
        self.strict_invariants = strict;
        self
    }

    /// Enables or disables write authorization checks.
    pub fn enforce_write_visibility(mut self, enforce: bool) -> Self {
        self.enforce_write_visibility = enforce;
        self
    }

    /// Sets the snapshot marker cadence.
    pub fn snapshot_markers(mut self, cadence: SnapshotMarkers) -> Self {
        self.snapshot_markers = cadence;
        self
    }
}

/// Visibility-gated graph over an append-only mutation log.
///
/// `Graph` holds no per-element state; every read replays the log, so one
/// instance can be shared freely across threads.
pub struct Graph {
    store: Arc<dyn MutationStore>,
    evaluator: VisibilityEvaluator,
    metrics: Arc<dyn EngineMetrics>,
    clock: Arc<TimestampOracle>,
    strict_invariants: bool,
    enforce_write_visibility: bool,
    snapshot_markers: SnapshotMarkers,
    /// Held from timestamp allocation until the write is appended.
    write_lock: Mutex<()>,
}

impl Graph {
    /// Opens a graph over the configured store.
    pub fn open(opts: GraphOptions) -> Result<Self> {
        let metrics = opts.metrics.unwrap_or_else(default_metrics);
        let clock = opts.clock.unwrap_or_default();
        if let Some(newest) = opts.store.max_timestamp() {
            clock.observe(newest);
        }
        info!(
            cache_capacity = opts.visibility_cache_capacity,
            strict = opts.strict_invariants,
            snapshot_markers = ?opts.snapshot_markers,
            "graph.open"
        );
        Ok(Self {
            store: opts.store,
            evaluator: VisibilityEvaluator::with_metrics(
                opts.visibility_cache_capacity,
                Arc::clone(&metrics),
            ),
            metrics,
            clock,
            strict_invariants: opts.strict_invariants,
            enforce_write_visibility: opts.enforce_write_visibility,
            snapshot_markers: opts.snapshot_markers,
            write_lock: Mutex::new(()),
        })
    }

    /// A graph over a fresh [`MemoryStore`].
    pub fn in_memory() -> Result<Self> {
        Self::open(GraphOptions::new(Arc::new(MemoryStore::new())))
    }

    /// Builds the store named by `config` through `registry` and opens a graph.
    pub fn from_config(config: &EngineConfig, registry: &StoreRegistry) -> Result<Self> {
        let store = registry.create(&config.store)?;
        Self::open(
            GraphOptions::new(store)
                .visibility_cache_capacity(config.visibility.cache_capacity)
                .strict_invariants(config.history.strict_invariants)
                .snapshot_markers(config.history.snapshot_markers),
        )
    }

    /// Underlying store.
    pub fn store(&self) -> &dyn MutationStore {
        self.store.as_ref()
    }

    /// Metrics sink.
    pub fn metrics(&self) -> &dyn EngineMetrics {
        self.metrics.as_ref()
    }

    /// Visibility evaluator and its cache.
    pub fn evaluator(&self) -> &VisibilityEvaluator {
        &self.evaluator
    }

    /// Writer timestamp source.
    pub fn clock(&self) -> &Arc<TimestampOracle> {
        &self.clock
    }

    /// Whether `auths` can read data labeled `visibility`.
    pub fn can_read(&self, visibility: &Visibility, auths: &Authorizations) -> Result<bool> {
        Ok(self.evaluator.can_read(visibility, auths)?)
    }

    /// State of an element as of `end_time` (inclusive; `None` = latest).
    pub fn materialize(
        &self,
        element_type: ElementType,
        id: &ElementId,
        fetch_hints: &FetchHints,
        end_time: Option<Timestamp>,
        user: &User,
    ) -> Result<Option<Element>> {
        materialize(
            &self.replay_context(),
            element_type,
            id,
            &Arc::new(fetch_hints.clone()),
            end_time,
            user.authorizations(),
        )
    }

    /// Latest state of a vertex.
    pub fn vertex(
        &self,
        id: impl Into<ElementId>,
        fetch_hints: &FetchHints,
        user: &User,
    ) -> Result<Option<Element>> {
        self.materialize(ElementType::Vertex, &id.into(), fetch_hints, None, user)
    }

    /// Latest state of an edge.
    pub fn edge(
        &self,
        id: impl Into<ElementId>,
        fetch_hints: &FetchHints,
        user: &User,
    ) -> Result<Option<Element>> {
        self.materialize(ElementType::Edge, &id.into(), fetch_hints, None, user)
    }

    /// The element's history, post-filtered by `fetch_hints` and paged after
    /// the exclusive cursor `after`.
    pub fn historical_events(
        &self,
        location: &ElementLocation,
        after: Option<&HistoricalEventId>,
        fetch_hints: &HistoricalEventsFetchHints,
        user: &User,
    ) -> Result<Vec<HistoricalEvent>> {
        let events = reconstruct(
            &self.replay_context(),
            location,
            &Arc::new(fetch_hints.clone()),
            user.authorizations(),
        )?;
        Ok(fetch_hints.apply(events, after))
    }

    /// Edge references of a vertex as of `end_time`, without loading the
    /// vertex's properties. Empty when the vertex is missing or unreadable.
    pub fn edge_infos(
        &self,
        vertex_id: &ElementId,
        direction: Direction,
        labels: Option<&[String]>,
        end_time: Option<Timestamp>,
        user: &User,
    ) -> Result<Vec<EdgeInfo>> {
        let ctx = self.replay_context();
        let exists = materialize(
            &ctx,
            ElementType::Vertex,
            vertex_id,
            &Arc::new(write::lookup_hints()),
            end_time,
            user.authorizations(),
        )?
        .is_some();
        if !exists {
            return Ok(Vec::new());
        }
        fold_edge_projections(
            &ctx,
            vertex_id,
            direction,
            labels,
            end_time,
            user.authorizations(),
        )
    }

    /// Starts a batch creating (or re-asserting) a vertex.
    pub fn prepare_vertex(
        &self,
        id: impl Into<ElementId>,
        visibility: Visibility,
    ) -> ElementMutation<'_> {
        ElementMutation::create(self, ElementLocation::vertex(id, visibility))
    }

    /// Starts a batch creating (or re-asserting) an edge.
    pub fn prepare_edge(
        &self,
        id: impl Into<ElementId>,
        out_vertex_id: impl Into<ElementId>,
        in_vertex_id: impl Into<ElementId>,
        label: impl Into<String>,
        visibility: Visibility,
    ) -> ElementMutation<'_> {
        ElementMutation::create(
            self,
            ElementLocation::edge(id, visibility, label, out_vertex_id, in_vertex_id),
        )
    }

    /// Starts a batch changing an existing element.
    ///
    /// Saving fails with [`PenumbraError::NotFound`] when the writer cannot
    /// see the element.
    pub fn alter_element(&self, location: &ElementLocation) -> ElementMutation<'_> {
        ElementMutation::alter(self, location.clone())
    }

    /// Deletes an element. Vertex deletes cascade to the edges the user can see.
    pub fn delete_element(
        &self,
        location: &ElementLocation,
        mode: DeleteMode,
        user: &User,
    ) -> Result<()> {
        write::delete_element(self, location, mode, user)
    }

    fn replay_context(&self) -> ReplayContext<'_> {
        ReplayContext {
            store: self.store.as_ref(),
            evaluator: &self.evaluator,
            metrics: self.metrics.as_ref(),
            strict: self.strict_invariants,
        }
    }

    pub(crate) fn snapshot_markers(&self) -> SnapshotMarkers {
        self.snapshot_markers
    }

    /// Current location of an element the user can see, hidden or not.
    pub(crate) fn current_location(
        &self,
        location: &ElementLocation,
        user: &User,
    ) -> Result<ElementLocation> {
        materialize(
            &self.replay_context(),
            location.element_type,
            &location.id,
            &Arc::new(write::lookup_hints()),
            None,
            user.authorizations(),
        )?
        .map(|element| element.location().clone())
        .ok_or_else(|| {
            PenumbraError::NotFound(format!("{} {}", location.element_type, location.id))
        })
    }

    /// Validates every visibility in `ops` and, when enforced, checks that the
    /// writer can read each one.
    pub(crate) fn authorize<'a>(
        &self,
        ops: impl IntoIterator<Item = &'a MutationOp>,
        user: &User,
    ) -> Result<()> {
        for op in ops {
            for visibility in op.visibilities() {
                if visibility.is_empty() {
                    continue;
                }
                let expr = self.evaluator.compiled(visibility)?;
                if self.enforce_write_visibility && !expr.evaluate(user.authorizations()) {
                    return Err(write::unauthorized(user, visibility));
                }
            }
        }
        Ok(())
    }

    /// Appends every batch of one write under a single timestamp, all or none.
    pub(crate) fn commit(
        &self,
        batches: Vec<ElementBatch>,
        explicit: Option<Timestamp>,
    ) -> Result<Timestamp> {
        let _guard = self.write_lock.lock();
        let timestamp = match explicit {
            Some(ts) => {
                self.clock.observe(ts);
                ts
            }
            None => self.clock.next(),
        };
        let appended = batches.iter().map(|b| b.ops.len()).sum();
        self.store.append_write(batches, timestamp)?;
        self.metrics.mutations_appended(appended);
        Ok(timestamp)
    }
}
