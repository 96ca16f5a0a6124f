//! Local message history.

use std::time::SystemTime;

/// Which way a message went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// One message exchanged with `peer`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub peer: String,
    pub direction: Direction,
    pub text: String,
    pub at: SystemTime,
}

/// Append-only log of this session's messages, oldest first.
#[derive(Debug, Default)]
pub(crate) struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    pub(crate) fn record(&mut self, peer: &str, direction: Direction, text: &str) {
        self.entries.push(HistoryEntry {
            peer: peer.to_string(),
            direction,
            text: text.to_string(),
            at: SystemTime::now(),
        });
    }

    /// All entries, or only those exchanged with `peer`.
    pub(crate) fn entries(&self, peer: Option<&str>) -> Vec<HistoryEntry> {
        self.entries
            .iter()
            .filter(|entry| peer.is_none_or(|p| entry.peer == p))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_filters_by_peer_and_keeps_order() {
        let mut history = History::default();
        history.record("bob", Direction::Outgoing, "hi bob");
        history.record("carol", Direction::Outgoing, "hi carol");
        history.record("bob", Direction::Incoming, "hi alice");

        let bob: Vec<(Direction, String)> = history
            .entries(Some("bob"))
            .into_iter()
            .map(|entry| (entry.direction, entry.text))
            .collect();
        assert_eq!(
            bob,
            vec![
                (Direction::Outgoing, "hi bob".to_string()),
                (Direction::Incoming, "hi alice".to_string()),
            ]
        );
        assert_eq!(history.entries(None).len(), 3);
        assert!(history.entries(Some("dave")).is_empty());
    }
}
