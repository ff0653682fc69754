//! Penumbra: cell-level visibility and replayable history for property graphs.
//!
//! Every vertex and edge is stored as an append-only log of timestamped
//! mutations, each carrying a visibility expression. Reads replay the log
//! through the caller's authorizations: [`Graph::materialize`] folds it into
//! the element's state at a point in time, and [`Graph::historical_events`]
//! turns it into a cursorable stream of domain events.
//!
//! ```no_run
//! use penumbra::{Authorizations, FetchHints, Graph, User, Visibility};
//!
//! # fn main() -> penumbra::Result<()> {
//! let graph = Graph::in_memory()?;
//! let analyst = User::new("analyst", Authorizations::new(["pii"]));
//! graph
//!     .prepare_vertex("v1", Visibility::empty())
//!     .set_property("k1", "age", 30i64, Visibility::new("pii"))
//!     .save(&analyst)?;
//! let vertex = graph.vertex("v1", &FetchHints::all(), &analyst)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod fetch_hints;
pub mod graph;
pub mod history;
mod materialize;
pub mod metrics;
pub mod model;
pub mod mutation;
pub mod security;
pub mod store;
pub mod types;
pub mod write;

pub use clock::TimestampOracle;
pub use config::{ConfigError, EngineConfig};
pub use fetch_hints::{FetchHints, HistoricalEventsFetchHints, SortDirection};
pub use graph::{Graph, GraphOptions};
pub use history::{HistoricalEvent, HistoricalEventId, HistoricalEventKind};
pub use metrics::{CounterMetrics, EngineMetrics, NoopMetrics};
pub use model::{
    EdgeEndpoints, EdgeInfo, Element, ElementLocation, MetadataEntry, Property, PropertyValue,
};
pub use mutation::{DeleteMode, Mutation, MutationOp};
pub use security::{Authorizations, SecurityError, User, Visibility};
pub use store::{
    ElementBatch, JournalOptions, JournalStore, MemoryStore, MutationStore, StoreRegistry,
};
pub use types::{Direction, ElementId, ElementType, PenumbraError, Result, Timestamp};
pub use write::{ElementMutation, SnapshotMarkers};
