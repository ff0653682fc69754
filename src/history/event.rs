use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::fetch_hints::HistoricalEventsFetchHints;
use crate::model::{MetadataEntry, PropertyKey, PropertyValue};
use crate::security::Visibility;
use crate::types::{Direction, ElementId, ElementType, PenumbraError, Result, Timestamp};

/// Total order over historical events and the exclusive pagination cursor.
///
/// `sub_order` is the position of the originating mutation among the
/// mutations sharing its timestamp in the raw log, so the id of an event does
/// not depend on who is reading.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct HistoricalEventId {
    /// Timestamp of the originating mutation.
    pub timestamp: Timestamp,
    /// Element kind.
    pub element_type: ElementType,
    /// Element id.
    pub element_id: ElementId,
    /// Tie breaker within one timestamp.
    pub sub_order: u32,
}

impl HistoricalEventId {
    /// Builds an id.
    pub fn new(
        timestamp: Timestamp,
        element_type: ElementType,
        element_id: impl Into<ElementId>,
        sub_order: u32,
    ) -> Self {
        Self {
            timestamp,
            element_type,
            element_id: element_id.into(),
            sub_order,
        }
    }
}

/// Cursor text form: `<timestamp>:<v|e>:<element id>:<sub order>`.
impl fmt::Display for HistoricalEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.timestamp,
            self.element_type.as_char(),
            self.element_id,
            self.sub_order
        )
    }
}

impl FromStr for HistoricalEventId {
    type Err = PenumbraError;

    fn from_str(s: &str) -> Result<Self> {
        const MALFORMED: PenumbraError = PenumbraError::Invalid("malformed historical event cursor");
        let (timestamp, rest) = s.split_once(':').ok_or(MALFORMED)?;
        let (ty, rest) = rest.split_once(':').ok_or(MALFORMED)?;
        // Element ids may contain ':', so the sub order is split from the right.
        let (id, sub_order) = rest.rsplit_once(':').ok_or(MALFORMED)?;
        let mut ty_chars = ty.chars();
        let element_type = match (ty_chars.next(), ty_chars.next()) {
            (Some(c), None) => ElementType::from_char(c).ok_or(MALFORMED)?,
            _ => return Err(MALFORMED),
        };
        if id.is_empty() {
            return Err(MALFORMED);
        }
        Ok(Self {
            timestamp: timestamp.parse().map_err(|_| MALFORMED)?,
            element_type,
            element_id: ElementId::from(id),
            sub_order: sub_order.parse().map_err(|_| MALFORMED)?,
        })
    }
}

/// What a historical event records.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HistoricalEventKind {
    /// Vertex created, re-created or re-asserted under a new visibility.
    AddVertex {
        /// Vertex visibility at that time.
        visibility: Visibility,
    },
    /// Edge created, re-created or re-asserted under a new visibility.
    AddEdge {
        /// Edge label.
        label: String,
        /// Vertex the edge leaves.
        out_vertex_id: ElementId,
        /// Vertex the edge enters.
        in_vertex_id: ElementId,
        /// Edge visibility at that time.
        visibility: Visibility,
    },
    /// Property value written.
    AddProperty {
        /// Property identity.
        property: PropertyKey,
        /// New value, when property values were requested.
        value: Option<PropertyValue>,
        /// Value it replaced, when previous values were requested.
        previous_value: Option<PropertyValue>,
        /// Metadata written with the value that the reader can see.
        metadata: Vec<MetadataEntry>,
    },
    /// Property value removed.
    DeleteProperty {
        /// Property identity.
        property: PropertyKey,
        /// Removed value, when previous values were requested.
        previous_value: Option<PropertyValue>,
    },
    /// Property value soft-deleted.
    SoftDeleteProperty {
        /// Property identity.
        property: PropertyKey,
        /// Removed value, when previous values were requested.
        previous_value: Option<PropertyValue>,
    },
    /// Element hidden.
    MarkHidden {
        /// Visibility of the hide marker.
        visibility: Visibility,
    },
    /// Element hide marker removed.
    MarkVisible {
        /// Visibility of the hide marker.
        visibility: Visibility,
    },
    /// Property value hidden.
    MarkPropertyHidden {
        /// Property identity.
        property: PropertyKey,
        /// Visibility of the hide marker.
        visibility: Visibility,
    },
    /// Property hide marker removed.
    MarkPropertyVisible {
        /// Property identity.
        property: PropertyKey,
        /// Visibility of the hide marker.
        visibility: Visibility,
    },
    /// Element moved to a new visibility.
    AlterVisibility {
        /// Visibility before.
        previous: Visibility,
        /// Visibility after.
        visibility: Visibility,
    },
    /// Property value moved to a new visibility.
    AlterPropertyVisibility {
        /// Property identity before the change.
        property: PropertyKey,
        /// Visibility after.
        visibility: Visibility,
    },
    /// Edge relabeled.
    AlterEdgeLabel {
        /// Label before.
        previous: String,
        /// Label after.
        label: String,
    },
    /// Edge attached to this vertex.
    AddEdgeToVertex {
        /// Edge id.
        edge_id: ElementId,
        /// Edge label.
        label: String,
        /// The other endpoint.
        other_vertex_id: ElementId,
        /// Direction relative to this vertex.
        direction: Direction,
        /// Edge visibility.
        visibility: Visibility,
    },
    /// Edge detached from this vertex.
    DeleteEdgeToVertex {
        /// Edge id.
        edge_id: ElementId,
        /// Edge label.
        label: String,
        /// The other endpoint.
        other_vertex_id: ElementId,
        /// Direction relative to this vertex.
        direction: Direction,
        /// Edge visibility.
        visibility: Visibility,
    },
    /// Vertex hard-deleted.
    DeleteVertex {
        /// Vertex visibility at that time.
        visibility: Visibility,
    },
    /// Vertex soft-deleted.
    SoftDeleteVertex {
        /// Vertex visibility at that time.
        visibility: Visibility,
    },
    /// Edge hard-deleted.
    DeleteEdge {
        /// Edge label at that time.
        label: String,
        /// Edge visibility at that time.
        visibility: Visibility,
    },
    /// Edge soft-deleted.
    SoftDeleteEdge {
        /// Edge label at that time.
        label: String,
        /// Edge visibility at that time.
        visibility: Visibility,
    },
}

impl HistoricalEventKind {
    /// Short name used in logs and text output.
    pub fn name(&self) -> &'static str {
        match self {
            HistoricalEventKind::AddVertex { .. } => "add_vertex",
            HistoricalEventKind::AddEdge { .. } => "add_edge",
            HistoricalEventKind::AddProperty { .. } => "add_property",
            HistoricalEventKind::DeleteProperty { .. } => "delete_property",
            HistoricalEventKind::SoftDeleteProperty { .. } => "soft_delete_property",
            HistoricalEventKind::MarkHidden { .. } => "mark_hidden",
            HistoricalEventKind::MarkVisible { .. } => "mark_visible",
            HistoricalEventKind::MarkPropertyHidden { .. } => "mark_property_hidden",
            HistoricalEventKind::MarkPropertyVisible { .. } => "mark_property_visible",
            HistoricalEventKind::AlterVisibility { .. } => "alter_visibility",
            HistoricalEventKind::AlterPropertyVisibility { .. } => "alter_property_visibility",
            HistoricalEventKind::AlterEdgeLabel { .. } => "alter_edge_label",
            HistoricalEventKind::AddEdgeToVertex { .. } => "add_edge_to_vertex",
            HistoricalEventKind::DeleteEdgeToVertex { .. } => "delete_edge_to_vertex",
            HistoricalEventKind::DeleteVertex { .. } => "delete_vertex",
            HistoricalEventKind::SoftDeleteVertex { .. } => "soft_delete_vertex",
            HistoricalEventKind::DeleteEdge { .. } => "delete_edge",
            HistoricalEventKind::SoftDeleteEdge { .. } => "soft_delete_edge",
        }
    }

    /// Property the event concerns, if any.
    pub fn property(&self) -> Option<&PropertyKey> {
        match self {
            HistoricalEventKind::AddProperty { property, .. }
            | HistoricalEventKind::DeleteProperty { property, .. }
            | HistoricalEventKind::SoftDeleteProperty { property, .. }
            | HistoricalEventKind::MarkPropertyHidden { property, .. }
            | HistoricalEventKind::MarkPropertyVisible { property, .. }
            | HistoricalEventKind::AlterPropertyVisibility { property, .. } => Some(property),
            _ => None,
        }
    }
}

/// One entry of an element's reconstructed history.
///
/// Carries the [`HistoricalEventsFetchHints`] it was built under; value
/// accessors fail when the hints did not request values.
#[derive(Clone, Debug, Serialize)]
pub struct HistoricalEvent {
    id: HistoricalEventId,
    #[serde(flatten)]
    kind: HistoricalEventKind,
    #[serde(skip)]
    fetch_hints: Arc<HistoricalEventsFetchHints>,
}

impl HistoricalEvent {
    pub(crate) fn new(
        id: HistoricalEventId,
        kind: HistoricalEventKind,
        fetch_hints: Arc<HistoricalEventsFetchHints>,
    ) -> Self {
        Self {
            id,
            kind,
            fetch_hints,
        }
    }

    /// Ordering key and cursor.
    pub fn id(&self) -> &HistoricalEventId {
        &self.id
    }

    /// Timestamp of the originating mutation.
    pub fn timestamp(&self) -> Timestamp {
        self.id.timestamp
    }

    /// What happened.
    pub fn kind(&self) -> &HistoricalEventKind {
        &self.kind
    }

    /// Hints the event was reconstructed with.
    pub fn fetch_hints(&self) -> &HistoricalEventsFetchHints {
        &self.fetch_hints
    }

    /// New value of an [`HistoricalEventKind::AddProperty`] event.
    pub fn value(&self) -> Result<Option<&PropertyValue>> {
        self.fetch_hints.assert_property_values_included()?;
        Ok(match &self.kind {
            HistoricalEventKind::AddProperty { value, .. } => value.as_ref(),
            _ => None,
        })
    }

    /// Value replaced or removed by a property event.
    pub fn previous_value(&self) -> Result<Option<&PropertyValue>> {
        self.fetch_hints.assert_previous_property_values_included()?;
        Ok(match &self.kind {
            HistoricalEventKind::AddProperty { previous_value, .. }
            | HistoricalEventKind::DeleteProperty { previous_value, .. }
            | HistoricalEventKind::SoftDeleteProperty { previous_value, .. } => {
                previous_value.as_ref()
            }
            _ => None,
        })
    }
}

impl PartialEq for HistoricalEvent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.kind == other.kind
    }
}

impl PartialOrd for HistoricalEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.id.cmp(&other.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_text_roundtrip_with_colon_in_id() {
        let id = HistoricalEventId::new(1_700_000_000_123, ElementType::Edge, "urn:edge:7", 2);
        let text = id.to_string();
        assert_eq!(text, "1700000000123:e:urn:edge:7:2");
        assert_eq!(text.parse::<HistoricalEventId>().unwrap(), id);
    }

    #[test]
    fn malformed_cursors_are_rejected() {
        for bad in ["", "12", "12:x:v1:0", "12:v::0", "a:v:v1:0", "12:v:v1:z", "12:vv:v1:0"] {
            assert!(
                matches!(bad.parse::<HistoricalEventId>(), Err(PenumbraError::Invalid(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn ids_order_by_time_then_sub_order() {
        let a = HistoricalEventId::new(5, ElementType::Vertex, "v1", 3);
        let b = HistoricalEventId::new(6, ElementType::Vertex, "v1", 0);
        let c = HistoricalEventId::new(6, ElementType::Vertex, "v1", 1);
        assert!(a < b && b < c);
    }

    #[test]
    fn value_accessors_enforce_hints() {
        let hints = HistoricalEventsFetchHints::builder()
            .include_property_values(false)
            .build();
        let event = HistoricalEvent::new(
            HistoricalEventId::new(1, ElementType::Vertex, "v1", 0),
            HistoricalEventKind::AddProperty {
                property: PropertyKey::new("k1", "age", Visibility::empty()),
                value: None,
                previous_value: None,
                metadata: vec![],
            },
            Arc::new(hints),
        );
        assert!(matches!(event.value(), Err(PenumbraError::MissingFetchHint(_))));
        assert_eq!(event.previous_value().unwrap(), None);
    }
}
