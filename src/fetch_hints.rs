//! Declarative read contracts.
//!
//! [`FetchHints`] states which parts of an element a reader intends to touch.
//! Materialization loads only those parts, and every accessor re-checks the
//! hints, failing with [`PenumbraError::MissingFetchHint`] instead of
//! returning an empty result for data that was never requested.
//!
//! [`HistoricalEventsFetchHints`] plays the same role for history queries:
//! time window, sort order, limit, and whether property values travel with
//! the events.

use std::collections::BTreeSet;

use crate::types::{Direction, PenumbraError, Result, Timestamp};

/// Which parts of an element a reader intends to access.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchHints {
    include_all_properties: bool,
    property_names_to_include: Option<BTreeSet<String>>,
    include_all_property_metadata: bool,
    metadata_keys_to_include: Option<BTreeSet<String>>,
    include_hidden: bool,
    include_out_edge_refs: bool,
    include_in_edge_refs: bool,
    edge_labels_of_edge_refs_to_include: Option<BTreeSet<String>>,
    include_edge_label_counts: bool,
    include_extended_data_table_names: bool,
}

impl FetchHints {
    /// Starts a builder with nothing requested.
    pub fn builder() -> FetchHintsBuilder {
        FetchHintsBuilder::default()
    }

    /// Requests nothing beyond the element's identity and visibility.
    pub fn none() -> Self {
        Self::builder().build()
    }

    /// Everything except hidden data.
    pub fn all() -> Self {
        Self::builder()
            .include_all_properties(true)
            .include_all_property_metadata(true)
            .include_all_edge_refs(true)
            .include_edge_label_counts(true)
            .include_extended_data_table_names(true)
            .build()
    }

    /// Everything, hidden data included.
    pub fn all_including_hidden() -> Self {
        Self::all().to_builder().include_hidden(true).build()
    }

    /// Properties with their metadata, no edge references.
    pub fn properties_and_metadata() -> Self {
        Self::builder()
            .include_all_properties(true)
            .include_all_property_metadata(true)
            .build()
    }

    /// Edge references in both directions only.
    pub fn edge_refs() -> Self {
        Self::builder().include_all_edge_refs(true).build()
    }

    /// Returns a builder seeded with these hints.
    pub fn to_builder(&self) -> FetchHintsBuilder {
        FetchHintsBuilder {
            hints: self.clone(),
        }
    }

    /// Whether hidden elements and properties are returned.
    pub fn include_hidden(&self) -> bool {
        self.include_hidden
    }

    /// Whether any property is loaded.
    pub fn has_properties(&self) -> bool {
        self.include_all_properties
            || self
                .property_names_to_include
                .as_ref()
                .is_some_and(|names| !names.is_empty())
    }

    /// Whether property `name` is loaded.
    pub fn is_include_property(&self, name: &str) -> bool {
        self.include_all_properties
            || self
                .property_names_to_include
                .as_ref()
                .is_some_and(|names| names.contains(name))
    }

    /// Whether any metadata is loaded.
    pub fn has_metadata(&self) -> bool {
        self.include_all_property_metadata
            || self
                .metadata_keys_to_include
                .as_ref()
                .is_some_and(|keys| !keys.is_empty())
    }

    /// Whether metadata entries under `key` are loaded.
    pub fn is_include_metadata(&self, key: &str) -> bool {
        self.include_all_property_metadata
            || self
                .metadata_keys_to_include
                .as_ref()
                .is_some_and(|keys| keys.contains(key))
    }

    /// Whether edge references in `direction` are loaded.
    pub fn is_include_edge_refs(&self, direction: Direction) -> bool {
        match direction {
            Direction::Out => self.include_out_edge_refs,
            Direction::In => self.include_in_edge_refs,
            Direction::Both => self.include_out_edge_refs && self.include_in_edge_refs,
        }
    }

    /// Whether any edge reference is loaded.
    pub fn has_edge_refs(&self) -> bool {
        self.include_out_edge_refs || self.include_in_edge_refs
    }

    /// Whether edge references labeled `label` pass the label allow-list.
    pub fn is_include_edge_label(&self, label: &str) -> bool {
        self.edge_labels_of_edge_refs_to_include
            .as_ref()
            .map_or(true, |labels| labels.contains(label))
    }

    /// Whether per-label edge counts are available.
    pub fn include_edge_label_counts(&self) -> bool {
        self.include_edge_label_counts
    }

    /// Whether extended data table names are loaded.
    pub fn include_extended_data_table_names(&self) -> bool {
        self.include_extended_data_table_names
    }

    /// Fails unless at least one property was requested.
    pub fn assert_properties_included(&self) -> Result<()> {
        if self.has_properties() {
            Ok(())
        } else {
            Err(missing("properties"))
        }
    }

    /// Fails unless property `name` was requested.
    pub fn assert_property_included(&self, name: &str) -> Result<()> {
        if self.is_include_property(name) {
            Ok(())
        } else {
            Err(missing(format!("property {name:?}")))
        }
    }

    /// Fails unless metadata `key` was requested.
    pub fn assert_metadata_included(&self, key: &str) -> Result<()> {
        if self.is_include_metadata(key) {
            Ok(())
        } else {
            Err(missing(format!("property metadata {key:?}")))
        }
    }

    /// Fails unless some metadata was requested.
    pub fn assert_any_metadata_included(&self) -> Result<()> {
        if self.has_metadata() {
            Ok(())
        } else {
            Err(missing("property metadata"))
        }
    }

    /// Fails unless edge references in `direction` were requested.
    pub fn assert_edge_refs_included(&self, direction: Direction) -> Result<()> {
        if self.is_include_edge_refs(direction) {
            Ok(())
        } else {
            Err(missing(format!("{direction} edge refs")))
        }
    }

    /// Fails unless edge label counts were requested.
    pub fn assert_edge_label_counts_included(&self) -> Result<()> {
        if self.include_edge_label_counts {
            Ok(())
        } else {
            Err(missing("edge label counts"))
        }
    }

    /// Fails unless extended data table names were requested.
    pub fn assert_extended_data_table_names_included(&self) -> Result<()> {
        if self.include_extended_data_table_names {
            Ok(())
        } else {
            Err(missing("extended data table names"))
        }
    }
}

fn missing(capability: impl Into<String>) -> PenumbraError {
    PenumbraError::MissingFetchHint(capability.into())
}

/// Builder for [`FetchHints`].
#[derive(Clone, Debug, Default)]
pub struct FetchHintsBuilder {
    hints: FetchHints,
}

impl FetchHintsBuilder {
    /// Loads every property.
    pub fn include_all_properties(mut self, include: bool) -> Self {
        self.hints.include_all_properties = include;
        self
    }

    /// Loads only the named properties.
    pub fn property_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hints.property_names_to_include = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Loads all property metadata.
    pub fn include_all_property_metadata(mut self, include: bool) -> Self {
        self.hints.include_all_property_metadata = include;
        self
    }

    /// Loads only metadata entries under the given keys.
    pub fn metadata_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hints.metadata_keys_to_include = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Returns hidden elements and properties.
    pub fn include_hidden(mut self, include: bool) -> Self {
        self.hints.include_hidden = include;
        self
    }

    /// Loads edge references in both directions.
    pub fn include_all_edge_refs(mut self, include: bool) -> Self {
        self.hints.include_out_edge_refs = include;
        self.hints.include_in_edge_refs = include;
        self
    }

    /// Loads outgoing edge references.
    pub fn include_out_edge_refs(mut self, include: bool) -> Self {
        self.hints.include_out_edge_refs = include;
        self
    }

    /// Loads incoming edge references.
    pub fn include_in_edge_refs(mut self, include: bool) -> Self {
        self.hints.include_in_edge_refs = include;
        self
    }

    /// Restricts loaded edge references to these labels.
    pub fn edge_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hints.edge_labels_of_edge_refs_to_include =
            Some(labels.into_iter().map(Into::into).collect());
        self
    }

    /// Makes per-label edge counts available.
    pub fn include_edge_label_counts(mut self, include: bool) -> Self {
        self.hints.include_edge_label_counts = include;
        self
    }

    /// Loads the names of extended data tables attached to the element.
    pub fn include_extended_data_table_names(mut self, include: bool) -> Self {
        self.hints.include_extended_data_table_names = include;
        self
    }

    /// Finalizes the hints.
    ///
    /// Metadata cannot be served without its owning property, so requesting
    /// metadata while requesting no properties upgrades to all properties.
    pub fn build(self) -> FetchHints {
        let mut hints = self.hints;
        let wants_properties = hints.include_all_properties
            || hints
                .property_names_to_include
                .as_ref()
                .is_some_and(|names| !names.is_empty());
        if hints.has_metadata() && !wants_properties {
            hints.include_all_properties = true;
        }
        hints
    }
}

/// Order of events returned by a history query.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum SortDirection {
    /// Oldest first.
    #[default]
    Ascending,
    /// Newest first.
    Descending,
}

/// Time window, ordering, limit, and payload options for history queries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoricalEventsFetchHints {
    pub(crate) start_time: Option<Timestamp>,
    pub(crate) end_time: Option<Timestamp>,
    pub(crate) sort_direction: SortDirection,
    pub(crate) limit: Option<usize>,
    pub(crate) include_property_values: bool,
    pub(crate) include_previous_property_values: bool,
}

impl Default for HistoricalEventsFetchHints {
    fn default() -> Self {
        Self {
            start_time: None,
            end_time: None,
            sort_direction: SortDirection::Ascending,
            limit: None,
            include_property_values: true,
            include_previous_property_values: true,
        }
    }
}

impl HistoricalEventsFetchHints {
    /// Starts from the defaults: unbounded, ascending, values included.
    pub fn builder() -> HistoricalEventsFetchHintsBuilder {
        HistoricalEventsFetchHintsBuilder {
            hints: Self::default(),
        }
    }

    /// Inclusive lower bound on event timestamps.
    pub fn start_time(&self) -> Option<Timestamp> {
        self.start_time
    }

    /// Inclusive upper bound on event timestamps.
    pub fn end_time(&self) -> Option<Timestamp> {
        self.end_time
    }

    /// Requested ordering.
    pub fn sort_direction(&self) -> SortDirection {
        self.sort_direction
    }

    /// Maximum events returned.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Whether property events carry their new value.
    pub fn include_property_values(&self) -> bool {
        self.include_property_values
    }

    /// Whether property events carry the value they replaced.
    pub fn include_previous_property_values(&self) -> bool {
        self.include_previous_property_values
    }

    /// Fails unless property values were requested.
    pub fn assert_property_values_included(&self) -> Result<()> {
        if self.include_property_values {
            Ok(())
        } else {
            Err(missing("historical property values"))
        }
    }

    /// Fails unless previous property values were requested.
    pub fn assert_previous_property_values_included(&self) -> Result<()> {
        if self.include_previous_property_values {
            Ok(())
        } else {
            Err(missing("historical previous property values"))
        }
    }
}

/// Builder for [`HistoricalEventsFetchHints`].
#[derive(Clone, Debug)]
pub struct HistoricalEventsFetchHintsBuilder {
    hints: HistoricalEventsFetchHints,
}

impl HistoricalEventsFetchHintsBuilder {
    /// Drops events before `ts`.
    pub fn start_time(mut self, ts: Timestamp) -> Self {
        self.hints.start_time = Some(ts);
        self
    }

    /// Drops events after `ts`.
    pub fn end_time(mut self, ts: Timestamp) -> Self {
        self.hints.end_time = Some(ts);
        self
    }

    /// Sets the ordering.
    pub fn sort_direction(mut self, direction: SortDirection) -> Self {
        self.hints.sort_direction = direction;
        self
    }

    /// Caps the number of returned events.
    pub fn limit(mut self, limit: usize) -> Self {
        self.hints.limit = Some(limit);
        self
    }

    /// Whether property events carry their value.
    pub fn include_property_values(mut self, include: bool) -> Self {
        self.hints.include_property_values = include;
        self
    }

    /// Whether property events carry the value they replaced.
    pub fn include_previous_property_values(mut self, include: bool) -> Self {
        self.hints.include_previous_property_values = include;
        self
    }

    /// Finalizes the hints.
    pub fn build(self) -> HistoricalEventsFetchHints {
        self.hints
    }
}
