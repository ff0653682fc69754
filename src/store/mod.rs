//! Backend adapter contract and the bundled adapters.
//!
//! A [`MutationStore`] persists per-element mutation logs and scans them back
//! in ascending timestamp order (append order on ties). Scans are lazy
//! iterators; a consumer that stops pulling stops paying for the scan.

mod journal;
mod memory;
mod registry;

use crate::model::ElementLocation;
use crate::mutation::{Mutation, MutationOp};
use crate::types::{Direction, ElementId, ElementType, PenumbraError, Result, Timestamp};

pub use journal::{JournalOptions, JournalStore};
pub use memory::MemoryStore;
pub use registry::{StoreFactory, StoreRegistry};

/// Pull-based sequence of scanned mutations. Backend errors are yielded in-band.
pub type MutationScan<'a> = Box<dyn Iterator<Item = Result<Mutation>> + Send + 'a>;

/// One element's share of a write.
#[derive(Clone, Debug, PartialEq)]
pub struct ElementBatch {
    /// Log the ops are appended to.
    pub location: ElementLocation,
    /// Operations in append order.
    pub ops: Vec<MutationOp>,
}

impl ElementBatch {
    /// Pairs a location with its ops.
    pub fn new(location: ElementLocation, ops: Vec<MutationOp>) -> Self {
        Self { location, ops }
    }
}

/// Persistence boundary implemented once per physical store.
///
/// Retry policy for transient failures belongs to the implementation; the
/// engine propagates whatever error a scan yields.
pub trait MutationStore: Send + Sync {
    /// Durably and atomically appends one element's batch under `timestamp`.
    ///
    /// Must reject a batch whose timestamp is older than the newest mutation
    /// already in that element's log.
    fn append_mutations(
        &self,
        location: &ElementLocation,
        ops: Vec<MutationOp>,
        timestamp: Timestamp,
    ) -> Result<()>;

    /// Appends the batches of one write under a shared `timestamp`, all or none.
    ///
    /// Every batch is validated before the first is applied. The default
    /// checks against scanned logs and then appends batch by batch, so it is
    /// only all-or-none when appends cannot fail for I/O reasons and nothing
    /// else writes concurrently. The bundled stores override it.
    fn append_write(&self, batches: Vec<ElementBatch>, timestamp: Timestamp) -> Result<()> {
        for batch in &batches {
            for op in &batch.ops {
                op.check_element_type(batch.location.element_type)?;
            }
            let newest = self
                .scan_mutations(batch.location.element_type, &batch.location.id, None)?
                .last()
                .transpose()?
                .map(|m| m.timestamp);
            check_not_before(batch.location.element_type, &batch.location.id, newest, timestamp)?;
        }
        for batch in batches {
            self.append_mutations(&batch.location, batch.ops, timestamp)?;
        }
        Ok(())
    }

    /// Scans one element's log up to `end_time` (inclusive), ascending.
    fn scan_mutations(
        &self,
        element_type: ElementType,
        id: &ElementId,
        end_time: Option<Timestamp>,
    ) -> Result<MutationScan<'_>>;

    /// Scans the edge projections in a vertex's log, filtered by direction and
    /// optionally by label.
    fn scan_edge_projections(
        &self,
        vertex_id: &ElementId,
        direction: Direction,
        labels: Option<&[String]>,
        end_time: Option<Timestamp>,
    ) -> Result<MutationScan<'_>>;

    /// Newest timestamp held by the store, used to seed a writer's clock.
    fn max_timestamp(&self) -> Option<Timestamp> {
        None
    }
}

/// Returns `true` when `op` is an edge projection matching the filters.
pub(crate) fn projection_matches(
    op: &MutationOp,
    direction: Direction,
    labels: Option<&[String]>,
) -> bool {
    match op {
        MutationOp::AddEdgeToVertex {
            label,
            direction: stored,
            ..
        }
        | MutationOp::DeleteEdgeToVertex {
            label,
            direction: stored,
            ..
        } => {
            direction.matches(*stored)
                && labels.map_or(true, |allowed| allowed.iter().any(|l| l == label))
        }
        _ => false,
    }
}

/// Rejects an append older than the newest mutation already in the log.
pub(crate) fn check_not_before(
    element_type: ElementType,
    id: &ElementId,
    newest: Option<Timestamp>,
    timestamp: Timestamp,
) -> Result<()> {
    match newest {
        Some(newest) if timestamp < newest => Err(PenumbraError::invariant(
            element_type,
            id,
            format!("append at {timestamp} precedes newest mutation at {newest}"),
        )),
        _ => Ok(()),
    }
}
