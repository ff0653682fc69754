use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use super::event::{HistoricalEvent, HistoricalEventId, HistoricalEventKind};
use crate::fetch_hints::HistoricalEventsFetchHints;
use crate::materialize::ReplayContext;
use crate::model::{ElementLocation, PropertyKey, PropertyValue};
use crate::mutation::{DeleteGuard, DeleteMode, Mutation, MutationOp};
use crate::security::{Authorizations, Visibility};
use crate::types::{ElementId, ElementType, Result, Timestamp};

/// Running state of the history fold.
struct HistoryState {
    element_visibility: Visibility,
    edge_label: String,
    last_add_element: Option<(ElementId, Visibility)>,
    last_add_edge_to_vertex: FxHashMap<ElementId, (String, Visibility)>,
    previous_values: FxHashMap<PropertyKey, PropertyValue>,
    suppressed: usize,
}

impl HistoryState {
    fn new(location: &ElementLocation) -> Self {
        Self {
            element_visibility: location.visibility.clone(),
            edge_label: location
                .edge
                .as_ref()
                .map(|e| e.label.clone())
                .unwrap_or_default(),
            last_add_element: None,
            last_add_edge_to_vertex: FxHashMap::default(),
            previous_values: FxHashMap::default(),
            suppressed: 0,
        }
    }

    /// Records an element snapshot and reports whether it is news.
    fn note_snapshot(&mut self, id: &ElementId, visibility: &Visibility) -> bool {
        self.element_visibility = visibility.clone();
        let unchanged = self
            .last_add_element
            .as_ref()
            .is_some_and(|(last_id, last_vis)| last_id == id && last_vis == visibility);
        if unchanged {
            self.suppressed += 1;
            return false;
        }
        self.last_add_element = Some((id.clone(), visibility.clone()));
        true
    }

    fn step(
        &mut self,
        ctx: &ReplayContext<'_>,
        location: &ElementLocation,
        mutation: Mutation,
        hints: &HistoricalEventsFetchHints,
        auths: &Authorizations,
    ) -> Result<Option<HistoricalEventKind>> {
        let id = &location.id;
        let kind = match mutation.op {
            MutationOp::UpdateVertex { visibility } => {
                if !self.note_snapshot(id, &visibility) {
                    return Ok(None);
                }
                HistoricalEventKind::AddVertex { visibility }
            }
            MutationOp::UpdateEdge {
                label,
                out_vertex_id,
                in_vertex_id,
                visibility,
            } => {
                self.edge_label = label.clone();
                if !self.note_snapshot(id, &visibility) {
                    return Ok(None);
                }
                HistoricalEventKind::AddEdge {
                    label,
                    out_vertex_id,
                    in_vertex_id,
                    visibility,
                }
            }
            MutationOp::SetProperty {
                property,
                value,
                metadata,
            } => {
                let previous = self.previous_values.insert(property.clone(), value.clone());
                let mut readable = Vec::with_capacity(metadata.len());
                for entry in metadata {
                    if ctx.readable(&entry.visibility, auths)? {
                        readable.push(entry);
                    }
                }
                HistoricalEventKind::AddProperty {
                    property,
                    value: hints.include_property_values().then_some(value),
                    previous_value: previous.filter(|_| hints.include_previous_property_values()),
                    metadata: readable,
                }
            }
            MutationOp::PropertyDelete { property } => {
                let previous = self.previous_values.remove(&property);
                HistoricalEventKind::DeleteProperty {
                    property,
                    previous_value: previous.filter(|_| hints.include_previous_property_values()),
                }
            }
            MutationOp::PropertySoftDelete { property } => {
                let previous = self.previous_values.remove(&property);
                HistoricalEventKind::SoftDeleteProperty {
                    property,
                    previous_value: previous.filter(|_| hints.include_previous_property_values()),
                }
            }
            MutationOp::MarkHidden { visibility } => HistoricalEventKind::MarkHidden { visibility },
            MutationOp::MarkVisible { visibility } => {
                HistoricalEventKind::MarkVisible { visibility }
            }
            MutationOp::MarkPropertyHidden {
                property,
                visibility,
            } => HistoricalEventKind::MarkPropertyHidden {
                property,
                visibility,
            },
            MutationOp::MarkPropertyVisible {
                property,
                visibility,
            } => HistoricalEventKind::MarkPropertyVisible {
                property,
                visibility,
            },
            MutationOp::AlterElementVisibility {
                previous,
                visibility,
            } => {
                self.element_visibility = visibility.clone();
                // The writer re-asserts the element under its new visibility in the
                // same batch; that snapshot is not a separate event.
                if self.last_add_element.is_some() {
                    self.last_add_element = Some((id.clone(), visibility.clone()));
                }
                HistoricalEventKind::AlterVisibility {
                    previous,
                    visibility,
                }
            }
            MutationOp::AlterPropertyVisibility {
                property,
                visibility,
            } => {
                if let Some(value) = self.previous_values.remove(&property) {
                    let moved =
                        PropertyKey::new(property.key.clone(), property.name.clone(), visibility.clone());
                    self.previous_values.insert(moved, value);
                }
                HistoricalEventKind::AlterPropertyVisibility {
                    property,
                    visibility,
                }
            }
            MutationOp::AlterEdgeLabel { label, .. } => {
                let previous = std::mem::replace(&mut self.edge_label, label.clone());
                HistoricalEventKind::AlterEdgeLabel { previous, label }
            }
            MutationOp::AddEdgeToVertex {
                edge_id,
                label,
                other_vertex_id,
                direction,
                visibility,
            } => {
                let unchanged = self
                    .last_add_edge_to_vertex
                    .get(&edge_id)
                    .is_some_and(|(last_label, last_vis)| {
                        *last_label == label && *last_vis == visibility
                    });
                if unchanged {
                    self.suppressed += 1;
                    return Ok(None);
                }
                self.last_add_edge_to_vertex
                    .insert(edge_id.clone(), (label.clone(), visibility.clone()));
                HistoricalEventKind::AddEdgeToVertex {
                    edge_id,
                    label,
                    other_vertex_id,
                    direction,
                    visibility,
                }
            }
            MutationOp::DeleteEdgeToVertex {
                edge_id,
                label,
                other_vertex_id,
                direction,
                visibility,
            } => {
                self.last_add_edge_to_vertex.remove(&edge_id);
                HistoricalEventKind::DeleteEdgeToVertex {
                    edge_id,
                    label,
                    other_vertex_id,
                    direction,
                    visibility,
                }
            }
            MutationOp::Delete { mode, .. } => {
                self.last_add_element = None;
                self.previous_values.clear();
                let visibility = self.element_visibility.clone();
                match (location.element_type, mode) {
                    (ElementType::Vertex, DeleteMode::Hard) => {
                        HistoricalEventKind::DeleteVertex { visibility }
                    }
                    (ElementType::Vertex, DeleteMode::Soft) => {
                        HistoricalEventKind::SoftDeleteVertex { visibility }
                    }
                    (ElementType::Edge, DeleteMode::Hard) => HistoricalEventKind::DeleteEdge {
                        label: self.edge_label.clone(),
                        visibility,
                    },
                    (ElementType::Edge, DeleteMode::Soft) => HistoricalEventKind::SoftDeleteEdge {
                        label: self.edge_label.clone(),
                        visibility,
                    },
                }
            }
            MutationOp::SetPropertyMetadata { .. }
            | MutationOp::SetExtendedData { .. }
            | MutationOp::DeleteExtendedData { .. } => return Ok(None),
        };
        Ok(Some(kind))
    }
}

/// Replays an element's entire log into the events `auths` may see, in log
/// order. Post-filtering is the caller's job.
pub(crate) fn reconstruct(
    ctx: &ReplayContext<'_>,
    location: &ElementLocation,
    hints: &Arc<HistoricalEventsFetchHints>,
    auths: &Authorizations,
) -> Result<Vec<HistoricalEvent>> {
    let mut guard = DeleteGuard::new(location.element_type, &location.id, ctx.strict);
    let mut state = HistoryState::new(location);
    let mut events = Vec::new();
    let mut skipped = 0usize;
    let mut tie: Option<(Timestamp, u32)> = None;
    for mutation in ctx
        .store
        .scan_mutations(location.element_type, &location.id, None)?
    {
        let mutation = mutation?;
        guard.observe(&mutation)?;
        let sub_order = match tie {
            Some((ts, sub)) if ts == mutation.timestamp => sub + 1,
            _ => 0,
        };
        tie = Some((mutation.timestamp, sub_order));
        if !ctx.readable(mutation.op.gate(), auths)? {
            skipped += 1;
            continue;
        }
        let timestamp = mutation.timestamp;
        if let Some(kind) = state.step(ctx, location, mutation, hints, auths)? {
            let id = HistoricalEventId::new(
                timestamp,
                location.element_type,
                location.id.clone(),
                sub_order,
            );
            events.push(HistoricalEvent::new(id, kind, Arc::clone(hints)));
        }
    }
    if skipped > 0 {
        ctx.metrics.mutations_hidden(skipped);
    }
    ctx.metrics
        .history_reconstructed(events.len(), state.suppressed);
    debug!(
        element = %location.id,
        element_type = %location.element_type,
        emitted = events.len(),
        suppressed = state.suppressed,
        skipped,
        "history.reconstruct"
    );
    Ok(events)
}
