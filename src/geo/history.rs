//! Bounded most-recent-first location history

use std::collections::VecDeque;

use crate::types::LocationEstimate;

/// Estimates kept by the Display.
pub const HISTORY_CAPACITY: usize = 10;

/// Last ten estimates, newest at index 0.
#[derive(Debug, Clone)]
pub struct LocationHistory {
    entries: VecDeque<LocationEstimate>,
}

impl Default for LocationHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationHistory {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Insert at the front, evicting the oldest entry past capacity.
    pub fn record(&mut self, estimate: LocationEstimate) {
        self.entries.push_front(estimate);
        self.entries.truncate(HISTORY_CAPACITY);
    }

    pub fn snapshot(&self) -> Vec<LocationEstimate> {
        self.entries.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<&LocationEstimate> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries worth showing, with their 1-based position. (0, 0) entries
    /// are stored but never reported.
    pub fn reportable(&self) -> impl Iterator<Item = (usize, &LocationEstimate)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.is_origin())
            .map(|(i, e)| (i + 1, e))
    }
}
