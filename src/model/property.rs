use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::PropertyValue;
use crate::fetch_hints::FetchHints;
use crate::security::Visibility;
use crate::types::{Result, Timestamp};

/// Uniqueness tuple of a property value: `(key, name, visibility)`.
///
/// The same `(key, name)` may hold several values under different visibilities.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PropertyKey {
    /// Discriminates multiple values of one property name.
    pub key: String,
    /// Property name.
    pub name: String,
    /// Visibility of the value.
    pub visibility: Visibility,
}

impl PropertyKey {
    /// Builds a property key.
    pub fn new(key: impl Into<String>, name: impl Into<String>, visibility: Visibility) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            visibility,
        }
    }
}

/// One metadata value, unique per `(key, visibility)` within a property.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    /// Metadata key.
    pub key: String,
    /// Metadata value.
    pub value: PropertyValue,
    /// Visibility of the entry.
    pub visibility: Visibility,
}

impl MetadataEntry {
    /// Builds a metadata entry.
    pub fn new(key: impl Into<String>, value: impl Into<PropertyValue>, visibility: Visibility) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            visibility,
        }
    }
}

/// Multi-valued metadata map keyed by `(key, visibility)`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyMetadata {
    entries: Vec<MetadataEntry>,
}

impl PropertyMetadata {
    /// Inserts or replaces the entry for `(entry.key, entry.visibility)`.
    pub fn set(&mut self, entry: MetadataEntry) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.key == entry.key && e.visibility == entry.visibility)
        {
            Some(existing) => existing.value = entry.value,
            None => self.entries.push(entry),
        }
    }

    /// Removes the entry for `(key, visibility)`.
    pub fn remove(&mut self, key: &str, visibility: &Visibility) -> Option<MetadataEntry> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.key == key && &e.visibility == visibility)?;
        Some(self.entries.remove(idx))
    }

    /// First entry under `key`.
    pub fn get(&self, key: &str) -> Option<&MetadataEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    /// Every entry under `key`, one per visibility.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a MetadataEntry> + 'a {
        self.entries.iter().filter(move |e| e.key == key)
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> &[MetadataEntry] {
        &self.entries
    }

    /// Returns `true` when no entry is present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn retain(&mut self, f: impl FnMut(&MetadataEntry) -> bool) {
        self.entries.retain(f);
    }
}

impl FromIterator<MetadataEntry> for PropertyMetadata {
    fn from_iter<T: IntoIterator<Item = MetadataEntry>>(iter: T) -> Self {
        let mut metadata = PropertyMetadata::default();
        for entry in iter {
            metadata.set(entry);
        }
        metadata
    }
}

/// A labeled, timestamped property value as seen by one reader.
#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    pub(crate) id: PropertyKey,
    pub(crate) value: PropertyValue,
    pub(crate) timestamp: Timestamp,
    pub(crate) metadata: PropertyMetadata,
    pub(crate) hidden_visibilities: SmallVec<[Visibility; 2]>,
    pub(crate) fetch_hints: Arc<FetchHints>,
}

impl Property {
    /// Property key.
    pub fn key(&self) -> &str {
        &self.id.key
    }

    /// Property name.
    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// Visibility of this value.
    pub fn visibility(&self) -> &Visibility {
        &self.id.visibility
    }

    /// The full uniqueness tuple.
    pub fn property_key(&self) -> &PropertyKey {
        &self.id
    }

    /// Current value.
    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    /// Timestamp of the mutation that last set the value.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Whether the reader can see a hide marker on this value.
    pub fn is_hidden(&self) -> bool {
        !self.hidden_visibilities.is_empty()
    }

    /// Visibilities of the hide markers the reader can see.
    pub fn hidden_visibilities(&self) -> &[Visibility] {
        &self.hidden_visibilities
    }

    /// All loaded metadata. Requires a metadata fetch hint.
    pub fn metadata(&self) -> Result<&PropertyMetadata> {
        self.fetch_hints.assert_any_metadata_included()?;
        Ok(&self.metadata)
    }

    /// First metadata entry under `key`. Requires that key's fetch hint.
    pub fn metadata_entry(&self, key: &str) -> Result<Option<&MetadataEntry>> {
        self.fetch_hints.assert_metadata_included(key)?;
        Ok(self.metadata.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_is_unique_per_key_and_visibility() {
        let mut meta = PropertyMetadata::default();
        meta.set(MetadataEntry::new("source", "a", Visibility::empty()));
        meta.set(MetadataEntry::new("source", "b", Visibility::new("x")));
        meta.set(MetadataEntry::new("source", "c", Visibility::empty()));
        assert_eq!(meta.entries().len(), 2);
        assert_eq!(meta.get("source").map(|e| &e.value), Some(&PropertyValue::from("c")));
        assert_eq!(meta.get_all("source").count(), 2);
        assert!(meta.remove("source", &Visibility::new("x")).is_some());
        assert_eq!(meta.get_all("source").count(), 1);
    }

    #[test]
    fn metadata_accessors_enforce_hints() {
        let prop = Property {
            id: PropertyKey::new("k1", "age", Visibility::empty()),
            value: PropertyValue::Int(30),
            timestamp: 1,
            metadata: PropertyMetadata::default(),
            hidden_visibilities: SmallVec::new(),
            fetch_hints: Arc::new(FetchHints::builder().include_all_properties(true).build()),
        };
        assert!(prop.metadata().is_err());
        assert!(prop.metadata_entry("source").is_err());
        assert_eq!(prop.value(), &PropertyValue::Int(30));
    }
}
