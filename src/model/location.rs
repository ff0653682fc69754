use serde::{Deserialize, Serialize};

use crate::security::Visibility;
use crate::types::{Direction, ElementId, ElementType, Timestamp};

/// Endpoints and label of an edge.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeEndpoints {
    /// Edge label.
    pub label: String,
    /// Vertex the edge leaves.
    pub out_vertex_id: ElementId,
    /// Vertex the edge enters.
    pub in_vertex_id: ElementId,
}

/// Minimal addressing handle for an element.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementLocation {
    /// Vertex or edge.
    pub element_type: ElementType,
    /// Element id.
    pub id: ElementId,
    /// Element visibility known to the caller.
    pub visibility: Visibility,
    /// Present for edges.
    pub edge: Option<EdgeEndpoints>,
}

impl ElementLocation {
    /// Location of a vertex.
    pub fn vertex(id: impl Into<ElementId>, visibility: Visibility) -> Self {
        Self {
            element_type: ElementType::Vertex,
            id: id.into(),
            visibility,
            edge: None,
        }
    }

    /// Location of an edge.
    pub fn edge(
        id: impl Into<ElementId>,
        visibility: Visibility,
        label: impl Into<String>,
        out_vertex_id: impl Into<ElementId>,
        in_vertex_id: impl Into<ElementId>,
    ) -> Self {
        Self {
            element_type: ElementType::Edge,
            id: id.into(),
            visibility,
            edge: Some(EdgeEndpoints {
                label: label.into(),
                out_vertex_id: out_vertex_id.into(),
                in_vertex_id: in_vertex_id.into(),
            }),
        }
    }
}

/// Reference from a vertex to one of its edges.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeInfo {
    /// Edge id.
    pub edge_id: ElementId,
    /// Edge label.
    pub label: String,
    /// Vertex at the other end.
    pub other_vertex_id: ElementId,
    /// Direction relative to the owning vertex.
    pub direction: Direction,
    /// Edge visibility.
    pub visibility: Visibility,
    /// When the reference was last written.
    pub timestamp: Timestamp,
}
