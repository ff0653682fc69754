use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::{EdgeEndpoints, EdgeInfo, ElementLocation, Property, PropertyValue};
use crate::fetch_hints::FetchHints;
use crate::security::Visibility;
use crate::types::{Direction, ElementId, ElementType, Result, Timestamp};

/// Point-in-time state of a vertex or edge as seen by one reader.
///
/// Accessors for anything beyond identity check the [`FetchHints`] the
/// element was materialized with and fail when the data was not requested.
#[derive(Clone, Debug, PartialEq)]
pub struct Element {
    pub(crate) location: ElementLocation,
    pub(crate) timestamp: Timestamp,
    pub(crate) properties: Vec<Property>,
    pub(crate) hidden_visibilities: Vec<Visibility>,
    pub(crate) edge_infos: Vec<EdgeInfo>,
    pub(crate) extended_data_table_names: BTreeSet<String>,
    pub(crate) fetch_hints: Arc<FetchHints>,
}

impl Element {
    /// Element id.
    pub fn id(&self) -> &ElementId {
        &self.location.id
    }

    /// Vertex or edge.
    pub fn element_type(&self) -> ElementType {
        self.location.element_type
    }

    /// Element visibility as of the materialization time.
    pub fn visibility(&self) -> &Visibility {
        &self.location.visibility
    }

    /// Addressing handle, including edge endpoints.
    pub fn location(&self) -> &ElementLocation {
        &self.location
    }

    /// Timestamp of the newest mutation folded into this state.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Hints this element was loaded with.
    pub fn fetch_hints(&self) -> &FetchHints {
        &self.fetch_hints
    }

    /// Whether the reader can see a hide marker on the element.
    pub fn is_hidden(&self) -> bool {
        !self.hidden_visibilities.is_empty()
    }

    /// Visibilities of the hide markers the reader can see.
    pub fn hidden_visibilities(&self) -> &[Visibility] {
        &self.hidden_visibilities
    }

    /// Label and endpoints for edges; `None` for vertices.
    pub fn edge_endpoints(&self) -> Option<&EdgeEndpoints> {
        self.location.edge.as_ref()
    }

    /// Edge label; `None` for vertices.
    pub fn edge_label(&self) -> Option<&str> {
        self.location.edge.as_ref().map(|e| e.label.as_str())
    }

    /// All loaded properties, ordered by name, key, then visibility.
    pub fn properties(&self) -> Result<&[Property]> {
        self.fetch_hints.assert_properties_included()?;
        Ok(&self.properties)
    }

    /// Every value of property `name` across keys and visibilities.
    pub fn properties_named<'a>(
        &'a self,
        name: &'a str,
    ) -> Result<impl Iterator<Item = &'a Property> + 'a> {
        self.fetch_hints.assert_property_included(name)?;
        Ok(self.properties.iter().filter(move |p| p.name() == name))
    }

    /// First value of property `name`.
    pub fn property(&self, name: &str) -> Result<Option<&Property>> {
        self.fetch_hints.assert_property_included(name)?;
        Ok(self.properties.iter().find(|p| p.name() == name))
    }

    /// The value at `(key, name)`, optionally pinned to one visibility.
    pub fn property_at(
        &self,
        key: &str,
        name: &str,
        visibility: Option<&Visibility>,
    ) -> Result<Option<&Property>> {
        self.fetch_hints.assert_property_included(name)?;
        Ok(self.properties.iter().find(|p| {
            p.name() == name
                && p.key() == key
                && visibility.map_or(true, |v| p.visibility() == v)
        }))
    }

    /// Shorthand for the first value of property `name`.
    pub fn property_value(&self, name: &str) -> Result<Option<&PropertyValue>> {
        Ok(self.property(name)?.map(Property::value))
    }

    /// Edge references in `direction`. Vertices only; edges return none.
    pub fn edge_infos(&self, direction: Direction) -> Result<Vec<&EdgeInfo>> {
        self.fetch_hints.assert_edge_refs_included(direction)?;
        Ok(self
            .edge_infos
            .iter()
            .filter(|info| direction.matches(info.direction))
            .filter(|info| self.fetch_hints.is_include_edge_label(&info.label))
            .collect())
    }

    /// Ids of edges in `direction`.
    pub fn edge_ids(&self, direction: Direction) -> Result<Vec<&ElementId>> {
        Ok(self
            .edge_infos(direction)?
            .into_iter()
            .map(|info| &info.edge_id)
            .collect())
    }

    /// Number of readable edges per label in `direction`.
    pub fn edge_label_counts(&self, direction: Direction) -> Result<BTreeMap<String, usize>> {
        self.fetch_hints.assert_edge_label_counts_included()?;
        let mut counts = BTreeMap::new();
        for info in self
            .edge_infos
            .iter()
            .filter(|info| direction.matches(info.direction))
        {
            *counts.entry(info.label.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Names of extended data tables holding at least one readable cell.
    pub fn extended_data_table_names(&self) -> Result<&BTreeSet<String>> {
        self.fetch_hints
            .assert_extended_data_table_names_included()?;
        Ok(&self.extended_data_table_names)
    }
}
