use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

/// Default number of transitions kept per device
pub const STATE_HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateType {
    Control,
    Process,
    Equipment,
    Communication,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateHistoryEntry {
    pub id: u64,
    pub state_type: StateType,
    pub old_value: String,
    pub new_value: String,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Append-only ring of state transitions; the oldest entry is evicted at capacity.
#[derive(Debug)]
pub(crate) struct StateHistory {
    entries: VecDeque<StateHistoryEntry>,
    capacity: usize,
    next_id: u64,
}

impl StateHistory {
    /// A capacity of zero is treated as one.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 1,
        }
    }

    pub(crate) fn record(
        &mut self,
        state_type: StateType,
        old_value: impl ToString,
        new_value: impl ToString,
        reason: Option<&str>,
    ) {
        let entry = StateHistoryEntry {
            id: self.next_id,
            state_type,
            old_value: old_value.to_string(),
            new_value: new_value.to_string(),
            timestamp: Utc::now(),
            reason: reason.map(str::to_string),
        };
        self.next_id += 1;

        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Newest `limit` entries in chronological order
    pub(crate) fn recent(&self, limit: usize) -> Vec<StateHistoryEntry> {
        let start = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(start).cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_evicts_oldest() {
        let mut history = StateHistory::with_capacity(3);
        for i in 0..5 {
            history.record(StateType::Process, i, i + 1, None);
        }
        assert_eq!(history.len(), 3);
        let recent = history.recent(10);
        assert_eq!(recent.first().unwrap().id, 3);
        assert_eq!(recent.last().unwrap().id, 5);
        assert_eq!(recent.last().unwrap().new_value, "5");
    }

    #[test]
    fn test_zero_capacity_keeps_latest_only() {
        let mut history = StateHistory::with_capacity(0);
        for i in 0..4 {
            history.record(StateType::Equipment, i, i + 1, None);
        }
        assert_eq!(history.len(), 1);
        assert_eq!(history.recent(10)[0].id, 4);
    }

    #[test]
    fn test_recent_limit() {
        let mut history = StateHistory::with_capacity(STATE_HISTORY_CAPACITY);
        history.record(StateType::Control, "A", "B", Some("first"));
        history.record(StateType::Control, "B", "C", None);
        let recent = history.recent(1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].old_value, "B");
    }
}
