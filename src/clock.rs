//! Monotonic write-timestamp source.
//!
//! Writers stamp every batch with a timestamp from a [`TimestampOracle`].
//! Timestamps follow wall-clock milliseconds when the clock moves forward and
//! fall back to `last + 1` otherwise, so a batch never receives a timestamp
//! at or below one already handed out by the same oracle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::trace;

use crate::types::Timestamp;

/// Thread-safe, strictly increasing timestamp allocator.
///
/// Share it across writers with `Arc<TimestampOracle>`.
#[derive(Debug, Default)]
pub struct TimestampOracle {
    last: AtomicU64,
}

impl TimestampOracle {
    /// Oracle with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Oracle that never allocates at or below `floor`.
    ///
    /// Used when reopening a persisted store to resume after its newest
    /// mutation.
    pub fn with_floor(floor: Timestamp) -> Self {
        Self {
            last: AtomicU64::new(floor),
        }
    }

    /// Allocates the next write timestamp.
    pub fn next(&self) -> Timestamp {
        let now = wall_clock_ms();
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let candidate = now.max(last.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    trace!(timestamp = candidate, "clock.allocate");
                    return candidate;
                }
                Err(observed) => last = observed,
            }
        }
    }

    /// Raises the floor to `ts` if it is newer than anything allocated so far.
    ///
    /// Writers that append with an explicit timestamp report it here so later
    /// allocations stay ahead of it.
    pub fn observe(&self, ts: Timestamp) {
        self.last.fetch_max(ts, Ordering::AcqRel);
    }

    /// Most recently allocated or observed timestamp.
    pub fn last(&self) -> Timestamp {
        self.last.load(Ordering::Acquire)
    }
}

fn wall_clock_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}
