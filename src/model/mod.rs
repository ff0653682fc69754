//! Element data model: labeled, versioned, multi-valued properties attached
//! to vertices and edges.

mod element;
mod location;
mod property;
mod value;

pub use element::Element;
pub use location::{EdgeEndpoints, EdgeInfo, ElementLocation};
pub use property::{MetadataEntry, Property, PropertyKey, PropertyMetadata};
pub use value::PropertyValue;
