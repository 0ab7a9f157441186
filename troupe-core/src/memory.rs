//! Bounded turn memory for responders.
//!
//! Each responder carries a sliding window of recent turn records. The
//! window is strict FIFO: once full, inserting evicts the oldest entry.

use crate::schema::TurnRecord;
use serde::{Deserialize, Serialize};

/// Maximum number of turn records a responder remembers.
pub const MEMORY_WINDOW_CAP: usize = 20;

/// A bounded, ordered window of turn records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryWindow {
    #[serde(default)]
    entries: Vec<TurnRecord>,
}

impl MemoryWindow {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append a record, evicting from the front past the cap.
    pub fn record(&mut self, record: TurnRecord) {
        self.entries.push(record);
        while self.entries.len() > MEMORY_WINDOW_CAP {
            self.entries.remove(0);
        }
    }

    /// The most recent `n` records, oldest first.
    pub fn recent(&self, n: usize) -> &[TurnRecord] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    pub fn entries(&self) -> &[TurnRecord] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(turn: u32) -> TurnRecord {
        TurnRecord {
            turn,
            input: format!("input {turn}"),
            narrative: format!("narrative {turn}"),
            summary: format!("summary {turn}"),
        }
    }

    #[test]
    fn test_window_holds_min_of_n_and_cap() {
        for n in [0usize, 1, 5, 19, 20, 21, 50] {
            let mut window = MemoryWindow::new();
            for i in 0..n {
                window.record(record(i as u32));
            }
            assert_eq!(window.len(), n.min(MEMORY_WINDOW_CAP), "after {n} inserts");
        }
    }

    #[test]
    fn test_window_keeps_last_entries_in_order() {
        let mut window = MemoryWindow::new();
        for i in 0..50 {
            window.record(record(i));
        }

        let turns: Vec<u32> = window.entries().iter().map(|r| r.turn).collect();
        let expected: Vec<u32> = (30..50).collect();
        assert_eq!(turns, expected);
    }

    #[test]
    fn test_recent_returns_tail_in_order() {
        let mut window = MemoryWindow::new();
        for i in 0..5 {
            window.record(record(i));
        }

        let turns: Vec<u32> = window.recent(3).iter().map(|r| r.turn).collect();
        assert_eq!(turns, vec![2, 3, 4]);

        // Asking for more than stored returns everything.
        assert_eq!(window.recent(100).len(), 5);
    }

    #[test]
    fn test_serde_round_trip() {
        let mut window = MemoryWindow::new();
        window.record(record(1));
        window.record(record(2));

        let json = serde_json::to_string(&window).unwrap();
        let restored: MemoryWindow = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.entries()[1].turn, 2);
    }
}
