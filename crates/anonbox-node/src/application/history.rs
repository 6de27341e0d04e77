//! In-memory chat history.
//!
//! AnonBox is amnesic: this log lives only as long as the process and is
//! cleared on shutdown.  It is bounded so a chatty peer cannot grow it without
//! limit; when full, the oldest entry is evicted.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Whether a history line was received or sent by this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// One line of chat history.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub direction: Direction,
    /// Display name of the sender (incoming) or recipient (outgoing).
    pub peer_name: String,
    pub text: String,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

/// Bounded, thread-safe chat log.
#[derive(Debug)]
pub struct ChatHistory {
    capacity: usize,
    entries: Mutex<VecDeque<HistoryEntry>>,
}

impl ChatHistory {
    /// Creates an empty history holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    /// Appends `entry`, evicting the oldest line if the log is full.
    pub fn record(&self, entry: HistoryEntry) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Returns a copy of all entries, oldest first.
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forgets every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<HistoryEntry>> {
        // A panic while holding the lock cannot leave the deque inconsistent.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
