use tessera_common::env::LogEntry;

/// In-memory replicated log. Index 1 is the first entry; index 0 is the
/// empty prefix with term 0.
#[derive(Debug, Clone, Default)]
pub struct RaftLog {
    entries: Vec<LogEntry>,
}

impl RaftLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<LogEntry>) -> Self {
        Self { entries }
    }

    pub fn last_index(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn last_term(&self) -> u64 {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    pub fn term_at(&self, index: u64) -> Option<u64> {
        if index == 0 {
            return Some(0);
        }
        self.entry(index).map(|e| e.term)
    }

    pub fn entry(&self, index: u64) -> Option<&LogEntry> {
        if index == 0 {
            return None;
        }
        self.entries.get((index - 1) as usize)
    }

    /// Up to `max` entries starting at `from`.
    pub fn entries_from(&self, from: u64, max: usize) -> Vec<LogEntry> {
        let start = from.max(1) as usize - 1;
        self.entries.iter().skip(start).take(max).cloned().collect()
    }

    /// Entries with index in `[from, to]`.
    pub fn slice(&self, from: u64, to: u64) -> Vec<LogEntry> {
        if from > to || from == 0 {
            return Vec::new();
        }
        let start = (from - 1) as usize;
        let end = (to as usize).min(self.entries.len());
        if start >= end {
            return Vec::new();
        }
        self.entries[start..end].to_vec()
    }

    pub fn append(&mut self, entry: LogEntry) {
        debug_assert_eq!(entry.index, self.last_index() + 1);
        self.entries.push(entry);
    }

    /// Drops `index` and everything after it.
    pub fn truncate_from(&mut self, index: u64) {
        let keep = index.saturating_sub(1) as usize;
        self.entries.truncate(keep);
    }

    /// Log-matching check used by AppendEntries.
    pub fn matches(&self, index: u64, term: u64) -> bool {
        self.term_at(index) == Some(term)
    }

    /// Whether a candidate with the given last entry is at least as
    /// up-to-date as this log.
    pub fn is_up_to_date(&self, last_index: u64, last_term: u64) -> bool {
        last_term > self.last_term() || (last_term == self.last_term() && last_index >= self.last_index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }
}
