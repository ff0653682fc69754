//! Write batches: one element's changes saved under one timestamp, with the
//! edge projections that keep endpoint vertex logs in lockstep.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fetch_hints::FetchHints;
use crate::graph::Graph;
use crate::model::{EdgeEndpoints, ElementLocation, MetadataEntry, PropertyKey, PropertyValue};
use crate::mutation::{DeleteMode, MutationOp};
use crate::security::{SecurityError, User, Visibility};
use crate::store::ElementBatch;
use crate::types::{Direction, ElementId, ElementType, PenumbraError, Result, Timestamp};

/// When writers emit an element snapshot marker (`UpdateVertex`/`UpdateEdge`).
///
/// Markers only give history reconstruction something to collapse; the
/// cadence never changes materialized state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotMarkers {
    /// On create and whenever the element visibility changes.
    #[default]
    OnChange,
    /// At the start of every saved batch.
    EveryBatch,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Intent {
    Create,
    Alter,
}

/// Pending changes to one element. Nothing is written until [`save`](Self::save).
#[must_use = "an element mutation does nothing until saved"]
pub struct ElementMutation<'g> {
    graph: &'g Graph,
    location: ElementLocation,
    intent: Intent,
    ops: Vec<MutationOp>,
    new_visibility: Option<Visibility>,
    new_label: Option<String>,
    timestamp: Option<Timestamp>,
}

impl<'g> ElementMutation<'g> {
    pub(crate) fn create(graph: &'g Graph, location: ElementLocation) -> Self {
        Self::with_intent(graph, location, Intent::Create)
    }

    pub(crate) fn alter(graph: &'g Graph, location: ElementLocation) -> Self {
        Self::with_intent(graph, location, Intent::Alter)
    }

    fn with_intent(graph: &'g Graph, location: ElementLocation, intent: Intent) -> Self {
        Self {
            graph,
            location,
            intent,
            ops: Vec::new(),
            new_visibility: None,
            new_label: None,
            timestamp: None,
        }
    }

    /// Sets the value at `(key, name, visibility)`.
    pub fn set_property(
        self,
        key: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<PropertyValue>,
        visibility: Visibility,
    ) -> Self {
        self.set_property_with_metadata(key, name, value, visibility, Vec::new())
    }

    /// Sets a value together with its metadata entries.
    pub fn set_property_with_metadata(
        mut self,
        key: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<PropertyValue>,
        visibility: Visibility,
        metadata: Vec<MetadataEntry>,
    ) -> Self {
        self.ops.push(MutationOp::SetProperty {
            property: PropertyKey::new(key, name, visibility),
            value: value.into(),
            metadata,
        });
        self
    }

    /// Writes one metadata entry on an existing value.
    pub fn set_property_metadata(
        mut self,
        key: impl Into<String>,
        name: impl Into<String>,
        property_visibility: Visibility,
        entry: MetadataEntry,
    ) -> Self {
        self.ops.push(MutationOp::SetPropertyMetadata {
            property: PropertyKey::new(key, name, property_visibility),
            entry,
        });
        self
    }

    /// Removes the value at `(key, name, visibility)`.
    pub fn delete_property(
        mut self,
        key: impl Into<String>,
        name: impl Into<String>,
        visibility: Visibility,
    ) -> Self {
        self.ops.push(MutationOp::PropertyDelete {
            property: PropertyKey::new(key, name, visibility),
        });
        self
    }

    /// Soft-deletes the value at `(key, name, visibility)`.
    pub fn soft_delete_property(
        mut self,
        key: impl Into<String>,
        name: impl Into<String>,
        visibility: Visibility,
    ) -> Self {
        self.ops.push(MutationOp::PropertySoftDelete {
            property: PropertyKey::new(key, name, visibility),
        });
        self
    }

    /// Hides the element from readers of `visibility`.
    pub fn mark_hidden(mut self, visibility: Visibility) -> Self {
        self.ops.push(MutationOp::MarkHidden { visibility });
        self
    }

    /// Removes a hide marker.
    pub fn mark_visible(mut self, visibility: Visibility) -> Self {
        self.ops.push(MutationOp::MarkVisible { visibility });
        self
    }

    /// Hides one property value from readers of `visibility`.
    pub fn mark_property_hidden(
        mut self,
        key: impl Into<String>,
        name: impl Into<String>,
        property_visibility: Visibility,
        visibility: Visibility,
    ) -> Self {
        self.ops.push(MutationOp::MarkPropertyHidden {
            property: PropertyKey::new(key, name, property_visibility),
            visibility,
        });
        self
    }

    /// Removes a property hide marker.
    pub fn mark_property_visible(
        mut self,
        key: impl Into<String>,
        name: impl Into<String>,
        property_visibility: Visibility,
        visibility: Visibility,
    ) -> Self {
        self.ops.push(MutationOp::MarkPropertyVisible {
            property: PropertyKey::new(key, name, property_visibility),
            visibility,
        });
        self
    }

    /// Moves the element to `visibility`.
    pub fn alter_visibility(mut self, visibility: Visibility) -> Self {
        self.new_visibility = Some(visibility);
        self
    }

    /// Moves one property value from `visibility` to `new_visibility`.
    pub fn alter_property_visibility(
        mut self,
        key: impl Into<String>,
        name: impl Into<String>,
        visibility: Visibility,
        new_visibility: Visibility,
    ) -> Self {
        self.ops.push(MutationOp::AlterPropertyVisibility {
            property: PropertyKey::new(key, name, visibility),
            visibility: new_visibility,
        });
        self
    }

    /// Relabels the edge. Saving fails for vertices.
    pub fn alter_edge_label(mut self, label: impl Into<String>) -> Self {
        self.new_label = Some(label.into());
        self
    }

    /// Writes one extended data cell.
    pub fn set_extended_data(
        mut self,
        table: impl Into<String>,
        row: impl Into<String>,
        column: impl Into<String>,
        value: impl Into<PropertyValue>,
        visibility: Visibility,
    ) -> Self {
        self.ops.push(MutationOp::SetExtendedData {
            table: table.into(),
            row: row.into(),
            column: column.into(),
            value: value.into(),
            visibility,
        });
        self
    }

    /// Removes one extended data cell.
    pub fn delete_extended_data(
        mut self,
        table: impl Into<String>,
        row: impl Into<String>,
        column: impl Into<String>,
        visibility: Visibility,
    ) -> Self {
        self.ops.push(MutationOp::DeleteExtendedData {
            table: table.into(),
            row: row.into(),
            column: column.into(),
            visibility,
        });
        self
    }

    /// Saves under `ts` instead of a clock timestamp.
    pub fn timestamp(mut self, ts: Timestamp) -> Self {
        self.timestamp = Some(ts);
        self
    }

    /// Appends the batch and its edge projections, returning the element's
    /// location after the change.
    pub fn save(self, user: &User) -> Result<ElementLocation> {
        let graph = self.graph;
        let current = match self.intent {
            Intent::Create => self.location,
            Intent::Alter => graph.current_location(&self.location, user)?,
        };
        let element_type = current.element_type;
        let endpoints = match (element_type, current.edge.as_ref()) {
            (ElementType::Edge, None) => {
                return Err(PenumbraError::Invalid("edge location requires endpoints"))
            }
            (ElementType::Vertex, _) if self.new_label.is_some() => {
                return Err(PenumbraError::Invalid("vertices have no label"))
            }
            (_, endpoints) => endpoints.cloned(),
        };

        let visibility_changed = self
            .new_visibility
            .as_ref()
            .is_some_and(|v| *v != current.visibility);
        let label_changed = match (&self.new_label, &endpoints) {
            (Some(label), Some(edge)) => *label != edge.label,
            _ => false,
        };
        let visibility = self
            .new_visibility
            .clone()
            .unwrap_or_else(|| current.visibility.clone());

        let leading_snapshot = match self.intent {
            Intent::Create => true,
            Intent::Alter => {
                graph.snapshot_markers() == SnapshotMarkers::EveryBatch && !visibility_changed
            }
        };
        let mut ops = Vec::with_capacity(self.ops.len() + 3);
        if leading_snapshot {
            ops.push(snapshot(&current.visibility, endpoints.as_ref()));
        }
        ops.extend(self.ops);
        if visibility_changed {
            ops.push(MutationOp::AlterElementVisibility {
                previous: current.visibility.clone(),
                visibility: visibility.clone(),
            });
            ops.push(snapshot(&visibility, endpoints.as_ref()));
        }
        let mut updated_edge = endpoints.clone();
        if let (true, Some(label), Some(edge)) = (label_changed, self.new_label, updated_edge.as_mut()) {
            ops.push(MutationOp::AlterEdgeLabel {
                label: label.clone(),
                visibility: visibility.clone(),
            });
            edge.label = label;
        }

        let mut projections: BTreeMap<ElementId, Vec<MutationOp>> = BTreeMap::new();
        if let (Some(before), Some(after)) = (endpoints.as_ref(), updated_edge.as_ref()) {
            let id = &current.id;
            if self.intent == Intent::Alter && (visibility_changed || label_changed) {
                project(&mut projections, id, before, &current.visibility, false);
            }
            if self.intent == Intent::Create || visibility_changed || label_changed {
                project(&mut projections, id, after, &visibility, true);
            }
        }

        graph.authorize(
            ops.iter().chain(projections.values().flatten()),
            user,
        )?;
        let location = ElementLocation {
            element_type,
            id: current.id.clone(),
            visibility,
            edge: updated_edge,
        };
        let appended = ops.len() + projections.values().map(Vec::len).sum::<usize>();
        let timestamp = graph.commit(write_batches(&location, ops, projections), self.timestamp)?;
        debug!(
            element = %location.id,
            element_type = %element_type,
            timestamp,
            mutations = appended,
            user = user.name(),
            "write.save"
        );
        Ok(location)
    }
}

fn snapshot(visibility: &Visibility, edge: Option<&EdgeEndpoints>) -> MutationOp {
    match edge {
        None => MutationOp::UpdateVertex {
            visibility: visibility.clone(),
        },
        Some(edge) => MutationOp::UpdateEdge {
            label: edge.label.clone(),
            out_vertex_id: edge.out_vertex_id.clone(),
            in_vertex_id: edge.in_vertex_id.clone(),
            visibility: visibility.clone(),
        },
    }
}

/// Queues an edge projection for both endpoint vertices.
fn project(
    projections: &mut BTreeMap<ElementId, Vec<MutationOp>>,
    edge_id: &ElementId,
    edge: &EdgeEndpoints,
    visibility: &Visibility,
    add: bool,
) {
    let sides = [
        (&edge.out_vertex_id, &edge.in_vertex_id, Direction::Out),
        (&edge.in_vertex_id, &edge.out_vertex_id, Direction::In),
    ];
    for (vertex, other, direction) in sides {
        let (edge_id, label, other_vertex_id, visibility) = (
            edge_id.clone(),
            edge.label.clone(),
            other.clone(),
            visibility.clone(),
        );
        let op = if add {
            MutationOp::AddEdgeToVertex {
                edge_id,
                label,
                other_vertex_id,
                direction,
                visibility,
            }
        } else {
            MutationOp::DeleteEdgeToVertex {
                edge_id,
                label,
                other_vertex_id,
                direction,
                visibility,
            }
        };
        projections.entry(vertex.clone()).or_default().push(op);
    }
}

/// Deletes an element; deleting a vertex also deletes every edge the user can
/// see on it.
pub(crate) fn delete_element(
    graph: &Graph,
    location: &ElementLocation,
    mode: DeleteMode,
    user: &User,
) -> Result<()> {
    let current = graph.current_location(location, user)?;
    if current.element_type == ElementType::Vertex {
        let mut seen = Vec::new();
        for info in graph.edge_infos(&current.id, Direction::Both, None, None, user)? {
            if seen.contains(&info.edge_id) {
                continue;
            }
            seen.push(info.edge_id.clone());
            let (out_vertex_id, in_vertex_id) = match info.direction {
                Direction::In => (info.other_vertex_id, current.id.clone()),
                _ => (current.id.clone(), info.other_vertex_id),
            };
            let edge = ElementLocation {
                element_type: ElementType::Edge,
                id: info.edge_id,
                visibility: info.visibility,
                edge: Some(EdgeEndpoints {
                    label: info.label,
                    out_vertex_id,
                    in_vertex_id,
                }),
            };
            delete_one(graph, &edge, mode, user)?;
        }
    }
    delete_one(graph, &current, mode, user)
}

fn delete_one(graph: &Graph, location: &ElementLocation, mode: DeleteMode, user: &User) -> Result<()> {
    let ops = vec![MutationOp::Delete {
        mode,
        visibility: location.visibility.clone(),
    }];
    let mut projections = BTreeMap::new();
    if let Some(edge) = location.edge.as_ref() {
        project(&mut projections, &location.id, edge, &location.visibility, false);
    }
    graph.authorize(ops.iter().chain(projections.values().flatten()), user)?;
    let timestamp = graph.commit(write_batches(location, ops, projections), None)?;
    debug!(
        element = %location.id,
        element_type = %location.element_type,
        mode = ?mode,
        timestamp,
        "write.delete"
    );
    Ok(())
}

/// The element's own batch first, then one batch per projected vertex.
fn write_batches(
    location: &ElementLocation,
    ops: Vec<MutationOp>,
    projections: BTreeMap<ElementId, Vec<MutationOp>>,
) -> Vec<ElementBatch> {
    let mut batches = Vec::with_capacity(1 + projections.len());
    batches.push(ElementBatch::new(location.clone(), ops));
    batches.extend(projections.into_iter().map(|(vertex_id, ops)| {
        ElementBatch::new(ElementLocation::vertex(vertex_id, Visibility::empty()), ops)
    }));
    batches
}

pub(crate) fn unauthorized(user: &User, visibility: &Visibility) -> PenumbraError {
    PenumbraError::Security(SecurityError::UnauthorizedWrite {
        user: user.name().to_string(),
        visibility: visibility.to_string(),
    })
}

/// Hints used by writers to look up the current state of an element.
pub(crate) fn lookup_hints() -> FetchHints {
    FetchHints::builder().include_hidden(true).build()
}
