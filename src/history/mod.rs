//! Element history: a cursorable stream of domain events rebuilt from the
//! mutation log.
//!
//! Reconstruction folds the entire log, so suppression decisions never depend
//! on the requested window; [`HistoricalEventsFetchHints::apply`] then sorts
//! and trims the result.
//!
//! [`HistoricalEventsFetchHints::apply`]: crate::fetch_hints::HistoricalEventsFetchHints::apply

mod event;
mod filter;
pub(crate) mod reconstruct;

pub use event::{HistoricalEvent, HistoricalEventId, HistoricalEventKind};
