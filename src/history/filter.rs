use super::event::{HistoricalEvent, HistoricalEventId};
use crate::fetch_hints::{HistoricalEventsFetchHints, SortDirection};

impl HistoricalEventsFetchHints {
    /// Sorts, windows, cursors and limits a reconstructed event list.
    ///
    /// Sorting happens first because `after` is relative to the sort
    /// direction: ascending keeps ids strictly greater than the cursor,
    /// descending keeps ids strictly smaller.
    pub fn apply(
        &self,
        mut events: Vec<HistoricalEvent>,
        after: Option<&HistoricalEventId>,
    ) -> Vec<HistoricalEvent> {
        match self.sort_direction {
            SortDirection::Ascending => events.sort_by(|a, b| a.id().cmp(b.id())),
            SortDirection::Descending => events.sort_by(|a, b| b.id().cmp(a.id())),
        }
        events.retain(|event| {
            let ts = event.timestamp();
            self.start_time.map_or(true, |start| ts >= start)
                && self.end_time.map_or(true, |end| ts <= end)
        });
        if let Some(cursor) = after {
            events.retain(|event| match self.sort_direction {
                SortDirection::Ascending => event.id() > cursor,
                SortDirection::Descending => event.id() < cursor,
            });
        }
        if let Some(limit) = self.limit {
            events.truncate(limit);
        }
        events
    }
}
