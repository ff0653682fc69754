//! Point-in-time element state by folding a mutation log.
//!
//! The fold walks one element's log in append order up to `end_time`. A
//! mutation whose gate visibility the reader cannot satisfy is skipped as if
//! it never happened, so two readers with different authorizations fold two
//! different, internally consistent histories from the same log.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::debug;

use crate::fetch_hints::FetchHints;
use crate::metrics::EngineMetrics;
use crate::model::{
    EdgeEndpoints, EdgeInfo, Element, ElementLocation, MetadataEntry, Property, PropertyKey,
    PropertyMetadata, PropertyValue,
};
use crate::mutation::{DeleteGuard, Mutation, MutationOp};
use crate::security::{Authorizations, Visibility, VisibilityEvaluator};
use crate::store::MutationStore;
use crate::types::{Direction, ElementId, ElementType, Result, Timestamp};

/// Collaborators shared by every replay.
pub(crate) struct ReplayContext<'a> {
    pub(crate) store: &'a dyn MutationStore,
    pub(crate) evaluator: &'a VisibilityEvaluator,
    pub(crate) metrics: &'a dyn EngineMetrics,
    pub(crate) strict: bool,
}

impl ReplayContext<'_> {
    pub(crate) fn readable(&self, visibility: &Visibility, auths: &Authorizations) -> Result<bool> {
        Ok(self.evaluator.can_read(visibility, auths)?)
    }
}

type EdgeRefKey = (ElementId, Direction);
type CellKey = (String, String, String, Visibility);

#[derive(Debug)]
struct PropertySlot {
    value: PropertyValue,
    timestamp: Timestamp,
    metadata: PropertyMetadata,
}

#[derive(Debug, Default)]
struct ElementState {
    created: bool,
    deleted: bool,
    visibility: Visibility,
    edge: Option<EdgeEndpoints>,
    properties: BTreeMap<PropertyKey, PropertySlot>,
    property_hidden: BTreeMap<PropertyKey, BTreeSet<Visibility>>,
    hidden: BTreeSet<Visibility>,
    edge_refs: BTreeMap<EdgeRefKey, EdgeInfo>,
    cells: BTreeMap<CellKey, PropertyValue>,
    timestamp: Timestamp,
}

impl ElementState {
    fn recreate(&mut self) {
        if self.deleted {
            self.properties.clear();
            self.property_hidden.clear();
            self.hidden.clear();
            self.cells.clear();
        }
        self.created = true;
        self.deleted = false;
    }

    fn apply(&mut self, mutation: Mutation) {
        self.timestamp = mutation.timestamp;
        match mutation.op {
            MutationOp::UpdateVertex { visibility } => {
                self.recreate();
                self.visibility = visibility;
            }
            MutationOp::UpdateEdge {
                label,
                out_vertex_id,
                in_vertex_id,
                visibility,
            } => {
                self.recreate();
                self.visibility = visibility;
                self.edge = Some(EdgeEndpoints {
                    label,
                    out_vertex_id,
                    in_vertex_id,
                });
            }
            MutationOp::SetProperty {
                property,
                value,
                metadata,
            } => {
                self.properties.insert(
                    property,
                    PropertySlot {
                        value,
                        timestamp: mutation.timestamp,
                        metadata: metadata.into_iter().collect(),
                    },
                );
            }
            MutationOp::SetPropertyMetadata { property, entry } => {
                if let Some(slot) = self.properties.get_mut(&property) {
                    slot.metadata.set(entry);
                }
            }
            MutationOp::PropertyDelete { property } | MutationOp::PropertySoftDelete { property } => {
                self.properties.remove(&property);
            }
            MutationOp::MarkHidden { visibility } => {
                self.hidden.insert(visibility);
            }
            MutationOp::MarkVisible { visibility } => {
                self.hidden.remove(&visibility);
            }
            MutationOp::MarkPropertyHidden {
                property,
                visibility,
            } => {
                self.property_hidden
                    .entry(property)
                    .or_default()
                    .insert(visibility);
            }
            MutationOp::MarkPropertyVisible {
                property,
                visibility,
            } => {
                if let Some(markers) = self.property_hidden.get_mut(&property) {
                    markers.remove(&visibility);
                    if markers.is_empty() {
                        self.property_hidden.remove(&property);
                    }
                }
            }
            MutationOp::AlterElementVisibility { visibility, .. } => {
                self.visibility = visibility;
            }
            MutationOp::AlterPropertyVisibility {
                property,
                visibility,
            } => {
                let moved = PropertyKey::new(property.key.clone(), property.name.clone(), visibility);
                if let Some(slot) = self.properties.remove(&property) {
                    self.properties.insert(moved.clone(), slot);
                }
                if let Some(markers) = self.property_hidden.remove(&property) {
                    self.property_hidden.insert(moved, markers);
                }
            }
            MutationOp::AlterEdgeLabel { label, .. } => {
                if let Some(edge) = self.edge.as_mut() {
                    edge.label = label;
                }
            }
            MutationOp::AddEdgeToVertex {
                edge_id,
                label,
                other_vertex_id,
                direction,
                visibility,
            } => {
                self.edge_refs.insert(
                    (edge_id.clone(), direction),
                    EdgeInfo {
                        edge_id,
                        label,
                        other_vertex_id,
                        direction,
                        visibility,
                        timestamp: mutation.timestamp,
                    },
                );
            }
            MutationOp::DeleteEdgeToVertex {
                edge_id, direction, ..
            } => {
                self.edge_refs.remove(&(edge_id, direction));
            }
            MutationOp::SetExtendedData {
                table,
                row,
                column,
                value,
                visibility,
            } => {
                self.cells.insert((table, row, column, visibility), value);
            }
            MutationOp::DeleteExtendedData {
                table,
                row,
                column,
                visibility,
            } => {
                self.cells.remove(&(table, row, column, visibility));
            }
            MutationOp::Delete { .. } => {
                self.deleted = true;
            }
        }
    }
}

/// Folds one element's log into the state visible to `auths` as of `end_time`.
///
/// Returns `None` when the element was never created, is deleted, cannot be
/// read, or is hidden and `fetch_hints` does not include hidden elements.
pub(crate) fn materialize(
    ctx: &ReplayContext<'_>,
    element_type: ElementType,
    id: &ElementId,
    fetch_hints: &Arc<FetchHints>,
    end_time: Option<Timestamp>,
    auths: &Authorizations,
) -> Result<Option<Element>> {
    let mut guard = DeleteGuard::new(element_type, id, ctx.strict);
    let mut state = ElementState::default();
    let mut folded = 0usize;
    let mut skipped = 0usize;
    for mutation in ctx.store.scan_mutations(element_type, id, end_time)? {
        let mutation = mutation?;
        guard.observe(&mutation)?;
        if !ctx.readable(mutation.op.gate(), auths)? {
            skipped += 1;
            continue;
        }
        folded += 1;
        state.apply(mutation);
    }
    if skipped > 0 {
        ctx.metrics.mutations_hidden(skipped);
    }
    let element = finish(ctx, element_type, id, state, fetch_hints, auths)?;
    ctx.metrics.element_materialized(element.is_some());
    debug!(
        element = %id,
        element_type = %element_type,
        folded,
        skipped,
        found = element.is_some(),
        "materialize.element"
    );
    Ok(element)
}

fn finish(
    ctx: &ReplayContext<'_>,
    element_type: ElementType,
    id: &ElementId,
    state: ElementState,
    fetch_hints: &Arc<FetchHints>,
    auths: &Authorizations,
) -> Result<Option<Element>> {
    if !state.created || state.deleted {
        return Ok(None);
    }
    if !ctx.readable(&state.visibility, auths)? {
        return Ok(None);
    }
    if !state.hidden.is_empty() && !fetch_hints.include_hidden() {
        return Ok(None);
    }

    let mut properties = Vec::new();
    for (key, slot) in state.properties {
        if !fetch_hints.is_include_property(&key.name) || !ctx.readable(&key.visibility, auths)? {
            continue;
        }
        let hidden: SmallVec<[Visibility; 2]> = state
            .property_hidden
            .get(&key)
            .map(|markers| markers.iter().cloned().collect())
            .unwrap_or_default();
        if !hidden.is_empty() && !fetch_hints.include_hidden() {
            continue;
        }
        let mut metadata = slot.metadata;
        if fetch_hints.has_metadata() {
            let mut readable = Vec::new();
            for entry in metadata.entries() {
                readable.push(
                    fetch_hints.is_include_metadata(&entry.key)
                        && ctx.readable(&entry.visibility, auths)?,
                );
            }
            let mut keep = readable.into_iter();
            metadata.retain(|_: &MetadataEntry| keep.next().unwrap_or(false));
        } else {
            metadata = PropertyMetadata::default();
        }
        properties.push(Property {
            id: key,
            value: slot.value,
            timestamp: slot.timestamp,
            metadata,
            hidden_visibilities: hidden,
            fetch_hints: Arc::clone(fetch_hints),
        });
    }
    properties.sort_by(|a, b| {
        (a.name(), a.key(), a.visibility()).cmp(&(b.name(), b.key(), b.visibility()))
    });

    let edge_infos = if fetch_hints.has_edge_refs() || fetch_hints.include_edge_label_counts() {
        state.edge_refs.into_values().collect()
    } else {
        Vec::new()
    };

    let extended_data_table_names = if fetch_hints.include_extended_data_table_names() {
        state
            .cells
            .into_keys()
            .map(|(table, _, _, _)| table)
            .collect()
    } else {
        BTreeSet::new()
    };

    Ok(Some(Element {
        location: ElementLocation {
            element_type,
            id: id.clone(),
            visibility: state.visibility,
            edge: state.edge,
        },
        timestamp: state.timestamp,
        properties,
        hidden_visibilities: state.hidden.into_iter().collect(),
        edge_infos,
        extended_data_table_names,
        fetch_hints: Arc::clone(fetch_hints),
    }))
}

/// Readable edge references of a vertex, folded from its projection facts.
pub(crate) fn fold_edge_projections(
    ctx: &ReplayContext<'_>,
    vertex_id: &ElementId,
    direction: Direction,
    labels: Option<&[String]>,
    end_time: Option<Timestamp>,
    auths: &Authorizations,
) -> Result<Vec<EdgeInfo>> {
    let mut state = ElementState::default();
    for mutation in ctx
        .store
        .scan_edge_projections(vertex_id, direction, labels, end_time)?
    {
        let mutation = mutation?;
        if ctx.readable(mutation.op.gate(), auths)? {
            state.apply(mutation);
        }
    }
    Ok(state.edge_refs.into_values().collect())
}
