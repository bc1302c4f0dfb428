//! # log
//!
//! why: manage the append-only log of commands that raft replicates
//! relations: owned by node.rs, entries travel inside message.rs requests
//! what: LogEntry struct, sentinel-first RaftLog, up-to-date comparison

use serde::{Deserialize, Serialize};

/// A single entry in the replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The term when this entry was created
    pub term: u64,
    /// The index of this entry in the log (0 is the sentinel)
    pub index: u64,
    /// The command to be applied to the state machine, absent for the sentinel
    pub command: Option<Vec<u8>>,
}

impl LogEntry {
    /// Create a new log entry carrying a command
    pub fn new(term: u64, index: u64, command: Vec<u8>) -> Self {
        Self {
            term,
            index,
            command: Some(command),
        }
    }

    /// The entry every log starts with: term 0, index 0, no command
    pub fn sentinel() -> Self {
        Self {
            term: 0,
            index: 0,
            command: None,
        }
    }
}

/// Sentinel-first, in-memory replicated log.
///
/// The entry at position `i` always has `index == i`, so lookups are plain
/// vector indexing. The sentinel is never truncated and never applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftLog {
    entries: Vec<LogEntry>,
}

impl Default for RaftLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RaftLog {
    pub fn new() -> Self {
        Self {
            entries: vec![LogEntry::sentinel()],
        }
    }

    /// Number of entries including the sentinel
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when only the sentinel is present
    pub fn is_empty(&self) -> bool {
        self.entries.len() == 1
    }

    pub fn last_index(&self) -> u64 {
        (self.entries.len() - 1) as u64
    }

    pub fn last_term(&self) -> u64 {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    pub fn entry(&self, index: u64) -> Option<&LogEntry> {
        self.entries.get(index as usize)
    }

    pub fn term_at(&self, index: u64) -> Option<u64> {
        self.entry(index).map(|e| e.term)
    }

    /// True if the log holds an entry at `index` created in `term`
    pub fn matches(&self, index: u64, term: u64) -> bool {
        self.term_at(index) == Some(term)
    }

    /// Append an entry at the tail. The caller guarantees `entry.index == len()`.
    pub fn append(&mut self, entry: LogEntry) {
        debug_assert_eq!(entry.index, self.entries.len() as u64);
        self.entries.push(entry);
    }

    /// Remove every entry at or after `index`; the sentinel always survives
    pub fn truncate_from(&mut self, index: u64) {
        let keep = (index as usize).max(1);
        self.entries.truncate(keep);
    }

    /// Clone the entries from `index` through the tail
    pub fn entries_from(&self, index: u64) -> Vec<LogEntry> {
        let start = (index as usize).max(1);
        self.entries.get(start..).map(<[LogEntry]>::to_vec).unwrap_or_default()
    }

    /// Clone the entries in `from..=to`, clamped to what the log holds
    pub fn range(&self, from: u64, to: u64) -> Vec<LogEntry> {
        let start = (from as usize).max(1);
        let end = (to as usize).min(self.entries.len() - 1);
        if start > end {
            return Vec::new();
        }
        self.entries[start..=end].to_vec()
    }

    /// Whether a candidate whose log ends at `(last_term, last_index)` is at
    /// least as up to date as this log.
    ///
    /// A strictly newer last term wins regardless of length; equal last terms
    /// fall back to comparing the last index.
    pub fn is_up_to_date(&self, last_index: u64, last_term: u64) -> bool {
        (last_term, last_index) >= (self.last_term(), self.last_index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with_terms(terms: &[u64]) -> RaftLog {
        let mut log = RaftLog::new();
        for (i, term) in terms.iter().enumerate() {
            log.append(LogEntry::new(*term, i as u64 + 1, vec![i as u8]));
        }
        log
    }

    #[test]
    fn new_log_holds_only_the_sentinel() {
        let log = RaftLog::new();
        assert_eq!(log.len(), 1);
        assert!(log.is_empty());
        assert_eq!(log.last_index(), 0);
        assert_eq!(log.last_term(), 0);
        assert_eq!(log.entry(0), Some(&LogEntry::sentinel()));
    }

    #[test]
    fn truncate_never_removes_sentinel() {
        let mut log = log_with_terms(&[1, 1, 2]);
        log.truncate_from(0);
        assert_eq!(log.len(), 1);
        assert_eq!(log.last_index(), 0);
    }

    #[test]
    fn truncate_drops_suffix() {
        let mut log = log_with_terms(&[1, 1, 2]);
        log.truncate_from(2);
        assert_eq!(log.last_index(), 1);
        assert_eq!(log.last_term(), 1);
    }

    #[test]
    fn entries_from_skips_sentinel_and_clamps() {
        let log = log_with_terms(&[1, 2, 3]);
        assert_eq!(log.entries_from(0).len(), 3);
        assert_eq!(log.entries_from(2).len(), 2);
        assert!(log.entries_from(4).is_empty());
        assert!(log.entries_from(99).is_empty());
    }

    #[test]
    fn range_is_inclusive_and_clamped() {
        let log = log_with_terms(&[1, 1, 1]);
        let r = log.range(2, 10);
        assert_eq!(r.iter().map(|e| e.index).collect::<Vec<_>>(), vec![2, 3]);
        assert!(log.range(3, 2).is_empty());
    }

    #[test]
    fn up_to_date_prefers_newer_term_then_longer_log() {
        let log = log_with_terms(&[1, 1, 2]);
        assert!(log.is_up_to_date(3, 2));
        assert!(log.is_up_to_date(4, 2));
        assert!(!log.is_up_to_date(2, 2));
        assert!(log.is_up_to_date(1, 3));
        assert!(!log.is_up_to_date(10, 1));
    }

    #[test]
    fn matches_checks_term_at_index() {
        let log = log_with_terms(&[1, 2]);
        assert!(log.matches(0, 0));
        assert!(log.matches(2, 2));
        assert!(!log.matches(2, 1));
        assert!(!log.matches(3, 2));
    }
}
