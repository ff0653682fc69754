use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use super::{check_not_before, projection_matches, ElementBatch, MutationScan, MutationStore};
use crate::model::ElementLocation;
use crate::mutation::codec::EncodedBatch;
use crate::mutation::{Mutation, MutationOp};
use crate::types::{Direction, ElementId, ElementType, Result, Timestamp};

type LogKey = (ElementType, ElementId);
type Logs = FxHashMap<LogKey, Arc<Vec<Mutation>>>;

/// In-process store keeping each element's log as an immutable snapshot.
///
/// Appends copy-on-write: a scan holds an `Arc` of the log it started on and
/// never observes later appends or a partially written batch. Readers take
/// the map lock only long enough to clone that `Arc`.
#[derive(Default)]
pub struct MemoryStore {
    logs: RwLock<Logs>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of element logs.
    pub fn element_count(&self) -> usize {
        self.logs.read().len()
    }

    /// Validates a write without performing it.
    pub(crate) fn check_write(&self, batches: &[ElementBatch], timestamp: Timestamp) -> Result<()> {
        check_write(&self.logs.read(), batches, timestamp)
    }

    /// Applies an already validated write.
    pub(crate) fn apply_write(&self, batches: Vec<ElementBatch>, timestamp: Timestamp) {
        apply_batches(&mut self.logs.write(), log_entries(batches), timestamp);
    }

    /// Validates and applies one decoded journal write.
    pub(crate) fn replay_write(&self, batches: Vec<EncodedBatch>) -> Result<()> {
        let mut logs = self.logs.write();
        for batch in &batches {
            check_batch(&logs, batch.element_type, &batch.id, &batch.ops, batch.timestamp)?;
        }
        for batch in batches {
            apply_batches(
                &mut logs,
                [((batch.element_type, batch.id), batch.ops)],
                batch.timestamp,
            );
        }
        Ok(())
    }

    fn snapshot(&self, element_type: ElementType, id: &ElementId) -> Option<Arc<Vec<Mutation>>> {
        self.logs
            .read()
            .get(&(element_type, id.clone()))
            .map(Arc::clone)
    }
}

impl MutationStore for MemoryStore {
    fn append_mutations(
        &self,
        location: &ElementLocation,
        ops: Vec<MutationOp>,
        timestamp: Timestamp,
    ) -> Result<()> {
        self.append_write(vec![ElementBatch::new(location.clone(), ops)], timestamp)
    }

    fn append_write(&self, batches: Vec<ElementBatch>, timestamp: Timestamp) -> Result<()> {
        let mut logs = self.logs.write();
        check_write(&logs, &batches, timestamp)?;
        trace!(
            timestamp,
            batches = batches.len(),
            count = batches.iter().map(|b| b.ops.len()).sum::<usize>(),
            "store.memory.append"
        );
        apply_batches(&mut logs, log_entries(batches), timestamp);
        Ok(())
    }

    fn scan_mutations(
        &self,
        element_type: ElementType,
        id: &ElementId,
        end_time: Option<Timestamp>,
    ) -> Result<MutationScan<'_>> {
        Ok(Box::new(SnapshotScan {
            log: self.snapshot(element_type, id),
            pos: 0,
            end_time,
            filter: ScanFilter::All,
        }))
    }

    fn scan_edge_projections(
        &self,
        vertex_id: &ElementId,
        direction: Direction,
        labels: Option<&[String]>,
        end_time: Option<Timestamp>,
    ) -> Result<MutationScan<'_>> {
        Ok(Box::new(SnapshotScan {
            log: self.snapshot(ElementType::Vertex, vertex_id),
            pos: 0,
            end_time,
            filter: ScanFilter::EdgeProjections {
                direction,
                labels: labels.map(<[String]>::to_vec),
            },
        }))
    }

    fn max_timestamp(&self) -> Option<Timestamp> {
        self.logs
            .read()
            .values()
            .filter_map(|log| log.last().map(|m| m.timestamp))
            .max()
    }
}

fn check_write(logs: &Logs, batches: &[ElementBatch], timestamp: Timestamp) -> Result<()> {
    for batch in batches {
        let location = &batch.location;
        check_batch(logs, location.element_type, &location.id, &batch.ops, timestamp)?;
    }
    Ok(())
}

fn log_entries(batches: Vec<ElementBatch>) -> impl Iterator<Item = (LogKey, Vec<MutationOp>)> {
    batches
        .into_iter()
        .map(|b| ((b.location.element_type, b.location.id), b.ops))
}

fn check_batch(
    logs: &Logs,
    element_type: ElementType,
    id: &ElementId,
    ops: &[MutationOp],
    timestamp: Timestamp,
) -> Result<()> {
    for op in ops {
        op.check_element_type(element_type)?;
    }
    let newest = logs
        .get(&(element_type, id.clone()))
        .and_then(|log| log.last())
        .map(|m| m.timestamp);
    check_not_before(element_type, id, newest, timestamp)
}

fn apply_batches(
    logs: &mut Logs,
    entries: impl IntoIterator<Item = (LogKey, Vec<MutationOp>)>,
    timestamp: Timestamp,
) {
    for (key, ops) in entries {
        if ops.is_empty() {
            continue;
        }
        let log = logs.entry(key).or_default();
        Arc::make_mut(log).extend(ops.into_iter().map(|op| Mutation::new(timestamp, op)));
    }
}

enum ScanFilter {
    All,
    EdgeProjections {
        direction: Direction,
        labels: Option<Vec<String>>,
    },
}

struct SnapshotScan {
    log: Option<Arc<Vec<Mutation>>>,
    pos: usize,
    end_time: Option<Timestamp>,
    filter: ScanFilter,
}

impl Iterator for SnapshotScan {
    type Item = Result<Mutation>;

    fn next(&mut self) -> Option<Self::Item> {
        let log = self.log.as_ref()?;
        loop {
            let mutation = log.get(self.pos)?;
            self.pos += 1;
            // Logs are ascending, so the first mutation past the bound ends the scan.
            if self.end_time.is_some_and(|end| mutation.timestamp > end) {
                self.pos = log.len();
                return None;
            }
            let keep = match &self.filter {
                ScanFilter::All => true,
                ScanFilter::EdgeProjections { direction, labels } => {
                    projection_matches(&mutation.op, *direction, labels.as_deref())
                }
            };
            if keep {
                return Some(Ok(mutation.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::Visibility;
    use crate::types::PenumbraError;

    fn update() -> MutationOp {
        MutationOp::UpdateVertex {
            visibility: Visibility::empty(),
        }
    }

    fn projection(edge: &str, label: &str, direction: Direction) -> MutationOp {
        MutationOp::AddEdgeToVertex {
            edge_id: ElementId::from(edge),
            label: label.into(),
            other_vertex_id: ElementId::from("v9"),
            direction,
            visibility: Visibility::empty(),
        }
    }

    #[test]
    fn scan_respects_end_time_and_order() -> Result<()> {
        let store = MemoryStore::new();
        let loc = ElementLocation::vertex("v1", Visibility::empty());
        store.append_mutations(&loc, vec![update()], 10)?;
        store.append_mutations(&loc, vec![update(), update()], 20)?;
        store.append_mutations(&loc, vec![update()], 30)?;
        let all: Vec<_> = store
            .scan_mutations(ElementType::Vertex, &loc.id, None)?
            .collect::<Result<_>>()?;
        assert_eq!(
            all.iter().map(|m| m.timestamp).collect::<Vec<_>>(),
            vec![10, 20, 20, 30]
        );
        let bounded = store
            .scan_mutations(ElementType::Vertex, &loc.id, Some(20))?
            .count();
        assert_eq!(bounded, 3);
        Ok(())
    }

    #[test]
    fn regressing_timestamp_is_rejected() -> Result<()> {
        let store = MemoryStore::new();
        let loc = ElementLocation::vertex("v1", Visibility::empty());
        store.append_mutations(&loc, vec![update()], 10)?;
        store.append_mutations(&loc, vec![update()], 10)?;
        let err = store
            .append_mutations(&loc, vec![update()], 9)
            .unwrap_err();
        assert!(matches!(err, PenumbraError::InvariantViolation { .. }));
        Ok(())
    }

    #[test]
    fn rejected_write_leaves_every_log_untouched() -> Result<()> {
        let store = MemoryStore::new();
        let v1 = ElementLocation::vertex("v1", Visibility::empty());
        let v2 = ElementLocation::vertex("v2", Visibility::empty());
        store.append_mutations(&v2, vec![update()], 100)?;
        let err = store
            .append_write(
                vec![
                    ElementBatch::new(v1.clone(), vec![update()]),
                    ElementBatch::new(v2.clone(), vec![projection("e1", "knows", Direction::In)]),
                ],
                50,
            )
            .unwrap_err();
        assert!(matches!(err, PenumbraError::InvariantViolation { .. }));
        assert_eq!(store.scan_mutations(ElementType::Vertex, &v1.id, None)?.count(), 0);
        assert_eq!(store.scan_mutations(ElementType::Vertex, &v2.id, None)?.count(), 1);
        Ok(())
    }

    #[test]
    fn projection_without_concrete_direction_is_rejected() {
        let store = MemoryStore::new();
        let loc = ElementLocation::vertex("v1", Visibility::empty());
        let err = store
            .append_mutations(&loc, vec![projection("e1", "knows", Direction::Both)], 1)
            .unwrap_err();
        assert!(matches!(err, PenumbraError::Invalid(_)));
        assert_eq!(store.element_count(), 0);
    }

    #[test]
    fn scan_is_a_stable_snapshot() -> Result<()> {
        let store = MemoryStore::new();
        let loc = ElementLocation::vertex("v1", Visibility::empty());
        store.append_mutations(&loc, vec![update()], 1)?;
        let scan = store.scan_mutations(ElementType::Vertex, &loc.id, None)?;
        store.append_mutations(&loc, vec![update()], 2)?;
        assert_eq!(scan.count(), 1);
        Ok(())
    }

    #[test]
    fn projection_scan_filters_direction_and_label() -> Result<()> {
        let store = MemoryStore::new();
        let loc = ElementLocation::vertex("v1", Visibility::empty());
        store.append_mutations(
            &loc,
            vec![
                update(),
                projection("e1", "knows", Direction::Out),
                projection("e2", "likes", Direction::In),
                projection("e3", "knows", Direction::In),
            ],
            5,
        )?;
        let ids = |dir, labels: Option<&[String]>| -> Result<Vec<String>> {
            store
                .scan_edge_projections(&loc.id, dir, labels, None)?
                .map(|m| {
                    m.map(|m| match m.op {
                        MutationOp::AddEdgeToVertex { edge_id, .. } => edge_id.to_string(),
                        _ => unreachable!(),
                    })
                })
                .collect()
        };
        assert_eq!(ids(Direction::Both, None)?, vec!["e1", "e2", "e3"]);
        assert_eq!(ids(Direction::In, None)?, vec!["e2", "e3"]);
        let knows = vec!["knows".to_string()];
        assert_eq!(ids(Direction::Both, Some(&knows))?, vec!["e1", "e3"]);
        Ok(())
    }

    #[test]
    fn missing_log_scans_empty() -> Result<()> {
        let store = MemoryStore::new();
        assert_eq!(
            store
                .scan_mutations(ElementType::Edge, &ElementId::from("nope"), None)?
                .count(),
            0
        );
        Ok(())
    }
}
