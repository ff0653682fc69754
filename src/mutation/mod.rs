//! Immutable, timestamped facts describing one atomic change to an element.
//!
//! Every state change is appended as a [`Mutation`]; element state and
//! history are both derived by replaying these facts in log order.

pub mod codec;

use serde::{Deserialize, Serialize};

use crate::model::{MetadataEntry, PropertyKey, PropertyValue};
use crate::security::Visibility;
use crate::types::{Direction, ElementId, ElementType, PenumbraError, Result, Timestamp};

/// Element deletion flavour.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode {
    /// The element is removed from every read, hidden ones included. A later
    /// snapshot marker re-creates it from scratch, as after a soft delete.
    Hard,
    /// The element is absent from normal reads but may be re-created.
    Soft,
}

/// A logged mutation: one operation and the time it was appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// Append time; non-decreasing within one element's log.
    pub timestamp: Timestamp,
    /// What changed.
    pub op: MutationOp,
}

impl Mutation {
    /// Pairs an operation with its timestamp.
    pub fn new(timestamp: Timestamp, op: MutationOp) -> Self {
        Self { timestamp, op }
    }
}

/// Payload of a [`Mutation`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MutationOp {
    /// Snapshot marker creating or re-asserting a vertex.
    UpdateVertex {
        /// Vertex visibility.
        visibility: Visibility,
    },
    /// Snapshot marker creating or re-asserting an edge.
    UpdateEdge {
        /// Edge label.
        label: String,
        /// Vertex the edge leaves.
        out_vertex_id: ElementId,
        /// Vertex the edge enters.
        in_vertex_id: ElementId,
        /// Edge visibility.
        visibility: Visibility,
    },
    /// Sets the value at `(key, name, visibility)`.
    SetProperty {
        /// Property identity.
        property: PropertyKey,
        /// New value.
        value: PropertyValue,
        /// Metadata written with the value.
        metadata: Vec<MetadataEntry>,
    },
    /// Writes one metadata entry on an existing property value.
    SetPropertyMetadata {
        /// Owning property value.
        property: PropertyKey,
        /// Entry to write; its visibility gates the mutation.
        entry: MetadataEntry,
    },
    /// Removes a property value.
    PropertyDelete {
        /// Property identity.
        property: PropertyKey,
    },
    /// Removes a property value, keeping it recoverable through history.
    PropertySoftDelete {
        /// Property identity.
        property: PropertyKey,
    },
    /// Hides the element from readers of `visibility`.
    MarkHidden {
        /// Visibility of the hide marker.
        visibility: Visibility,
    },
    /// Removes the hide marker written under `visibility`.
    MarkVisible {
        /// Visibility of the hide marker.
        visibility: Visibility,
    },
    /// Hides one property value from readers of `visibility`.
    MarkPropertyHidden {
        /// Property identity.
        property: PropertyKey,
        /// Visibility of the hide marker.
        visibility: Visibility,
    },
    /// Removes a property hide marker.
    MarkPropertyVisible {
        /// Property identity.
        property: PropertyKey,
        /// Visibility of the hide marker.
        visibility: Visibility,
    },
    /// Moves the element to a new visibility.
    AlterElementVisibility {
        /// Visibility before the change; gates the mutation.
        previous: Visibility,
        /// Visibility after the change.
        visibility: Visibility,
    },
    /// Moves a property value to a new visibility.
    AlterPropertyVisibility {
        /// Property identity before the change; gates the mutation.
        property: PropertyKey,
        /// Visibility after the change.
        visibility: Visibility,
    },
    /// Relabels an edge.
    AlterEdgeLabel {
        /// New label.
        label: String,
        /// Edge visibility at the time of the change.
        visibility: Visibility,
    },
    /// Projection of an edge into one endpoint vertex's log.
    AddEdgeToVertex {
        /// Edge id.
        edge_id: ElementId,
        /// Edge label.
        label: String,
        /// The other endpoint.
        other_vertex_id: ElementId,
        /// Direction relative to the vertex owning the log.
        direction: Direction,
        /// Edge visibility.
        visibility: Visibility,
    },
    /// Removal of an edge projection.
    DeleteEdgeToVertex {
        /// Edge id.
        edge_id: ElementId,
        /// Edge label.
        label: String,
        /// The other endpoint.
        other_vertex_id: ElementId,
        /// Direction relative to the vertex owning the log.
        direction: Direction,
        /// Edge visibility.
        visibility: Visibility,
    },
    /// Writes one extended data cell.
    SetExtendedData {
        /// Table name.
        table: String,
        /// Row id.
        row: String,
        /// Column name.
        column: String,
        /// Cell value.
        value: PropertyValue,
        /// Cell visibility.
        visibility: Visibility,
    },
    /// Removes one extended data cell.
    DeleteExtendedData {
        /// Table name.
        table: String,
        /// Row id.
        row: String,
        /// Column name.
        column: String,
        /// Cell visibility.
        visibility: Visibility,
    },
    /// Deletes the element.
    Delete {
        /// Hard or soft.
        mode: DeleteMode,
        /// Element visibility at the time of deletion.
        visibility: Visibility,
    },
}

impl MutationOp {
    /// The visibility a reader must satisfy for this mutation to exist for them.
    pub fn gate(&self) -> &Visibility {
        match self {
            MutationOp::UpdateVertex { visibility }
            | MutationOp::UpdateEdge { visibility, .. }
            | MutationOp::MarkHidden { visibility }
            | MutationOp::MarkVisible { visibility }
            | MutationOp::MarkPropertyHidden { visibility, .. }
            | MutationOp::MarkPropertyVisible { visibility, .. }
            | MutationOp::AlterEdgeLabel { visibility, .. }
            | MutationOp::AddEdgeToVertex { visibility, .. }
            | MutationOp::DeleteEdgeToVertex { visibility, .. }
            | MutationOp::SetExtendedData { visibility, .. }
            | MutationOp::DeleteExtendedData { visibility, .. }
            | MutationOp::Delete { visibility, .. } => visibility,
            MutationOp::SetProperty { property, .. }
            | MutationOp::PropertyDelete { property }
            | MutationOp::PropertySoftDelete { property }
            | MutationOp::AlterPropertyVisibility { property, .. } => &property.visibility,
            MutationOp::SetPropertyMetadata { entry, .. } => &entry.visibility,
            MutationOp::AlterElementVisibility { previous, .. } => previous,
        }
    }

    /// Every visibility carried by the operation, for write-time validation.
    pub fn visibilities(&self) -> Vec<&Visibility> {
        let mut out = vec![self.gate()];
        match self {
            MutationOp::SetProperty {
                property, metadata, ..
            } => {
                out.push(&property.visibility);
                out.extend(metadata.iter().map(|m| &m.visibility));
            }
            MutationOp::SetPropertyMetadata { property, .. }
            | MutationOp::MarkPropertyHidden { property, .. }
            | MutationOp::MarkPropertyVisible { property, .. } => out.push(&property.visibility),
            MutationOp::AlterElementVisibility { visibility, .. }
            | MutationOp::AlterPropertyVisibility { visibility, .. } => out.push(visibility),
            _ => {}
        }
        out
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            MutationOp::UpdateVertex { .. } => "update_vertex",
            MutationOp::UpdateEdge { .. } => "update_edge",
            MutationOp::SetProperty { .. } => "set_property",
            MutationOp::SetPropertyMetadata { .. } => "set_property_metadata",
            MutationOp::PropertyDelete { .. } => "property_delete",
            MutationOp::PropertySoftDelete { .. } => "property_soft_delete",
            MutationOp::MarkHidden { .. } => "mark_hidden",
            MutationOp::MarkVisible { .. } => "mark_visible",
            MutationOp::MarkPropertyHidden { .. } => "mark_property_hidden",
            MutationOp::MarkPropertyVisible { .. } => "mark_property_visible",
            MutationOp::AlterElementVisibility { .. } => "alter_element_visibility",
            MutationOp::AlterPropertyVisibility { .. } => "alter_property_visibility",
            MutationOp::AlterEdgeLabel { .. } => "alter_edge_label",
            MutationOp::AddEdgeToVertex { .. } => "add_edge_to_vertex",
            MutationOp::DeleteEdgeToVertex { .. } => "delete_edge_to_vertex",
            MutationOp::SetExtendedData { .. } => "set_extended_data",
            MutationOp::DeleteExtendedData { .. } => "delete_extended_data",
            MutationOp::Delete { .. } => "delete",
        }
    }

    /// Returns `true` for the denormalized edge facts kept in vertex logs.
    pub fn is_edge_projection(&self) -> bool {
        matches!(
            self,
            MutationOp::AddEdgeToVertex { .. } | MutationOp::DeleteEdgeToVertex { .. }
        )
    }

    /// Returns `true` for snapshot markers.
    pub fn is_snapshot(&self) -> bool {
        matches!(
            self,
            MutationOp::UpdateVertex { .. } | MutationOp::UpdateEdge { .. }
        )
    }

    /// Checks that the operation may appear in a log of `element_type`.
    ///
    /// Edge projections must name `In` or `Out`.
    pub fn check_element_type(&self, element_type: ElementType) -> Result<()> {
        if let MutationOp::AddEdgeToVertex {
            direction: Direction::Both,
            ..
        }
        | MutationOp::DeleteEdgeToVertex {
            direction: Direction::Both,
            ..
        } = self
        {
            return Err(PenumbraError::Invalid(
                "edge projections need a concrete direction",
            ));
        }
        let ok = match self {
            MutationOp::UpdateVertex { .. }
            | MutationOp::AddEdgeToVertex { .. }
            | MutationOp::DeleteEdgeToVertex { .. } => element_type == ElementType::Vertex,
            MutationOp::UpdateEdge { .. } | MutationOp::AlterEdgeLabel { .. } => {
                element_type == ElementType::Edge
            }
            _ => true,
        };
        if ok {
            Ok(())
        } else {
            Err(PenumbraError::Corruption(
                "mutation kind does not match element type",
            ))
        }
    }
}

/// Detects writer bugs in a raw, unfiltered log.
///
/// After a `Delete`, only a snapshot marker (re-create) or edge projections
/// may follow; anything else would silently resurrect state. The guard sees
/// every mutation regardless of the reader's authorizations, so a re-create
/// the reader cannot see never causes a false alarm.
#[derive(Debug)]
pub(crate) struct DeleteGuard<'a> {
    element_type: ElementType,
    id: &'a ElementId,
    strict: bool,
    deleted_at: Option<Timestamp>,
}

impl<'a> DeleteGuard<'a> {
    pub(crate) fn new(element_type: ElementType, id: &'a ElementId, strict: bool) -> Self {
        Self {
            element_type,
            id,
            strict,
            deleted_at: None,
        }
    }

    pub(crate) fn observe(&mut self, mutation: &Mutation) -> Result<()> {
        mutation.op.check_element_type(self.element_type)?;
        match &mutation.op {
            MutationOp::Delete { .. } => self.deleted_at = Some(mutation.timestamp),
            op if op.is_snapshot() => self.deleted_at = None,
            op if op.is_edge_projection() => {}
            op => {
                if let (true, Some(deleted_at)) = (self.strict, self.deleted_at) {
                    return Err(PenumbraError::invariant(
                        self.element_type,
                        self.id,
                        format!(
                            "{} at {} follows delete at {} without re-create",
                            op.name(),
                            mutation.timestamp,
                            deleted_at
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}
