use tessera_common::env::LogEntry;
use tessera_common::Result;

use super::RaftStorage;
use crate::raft::state::HardState;

/// Volatile storage for tests and throwaway dev nodes.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    hard_state: HardState,
    log: Vec<LogEntry>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RaftStorage for MemoryStorage {
    fn save_hard_state(&mut self, state: &HardState) -> Result<()> {
        self.hard_state = state.clone();
        Ok(())
    }

    fn load_hard_state(&self) -> Result<HardState> {
        Ok(self.hard_state.clone())
    }

    fn append_entries(&mut self, entries: &[LogEntry]) -> Result<()> {
        self.log.extend_from_slice(entries);
        Ok(())
    }

    fn truncate_log_from(&mut self, from_index: u64) -> Result<()> {
        self.log.retain(|e| e.index < from_index);
        Ok(())
    }

    fn load_log(&self) -> Result<Vec<LogEntry>> {
        Ok(self.log.clone())
    }
}
