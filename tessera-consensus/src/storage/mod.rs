//! Durable Raft state: the hard state and the log.
//!
//! The runtime applies each [`crate::Ready`] through [`persist_ready`]
//! before any of its messages leave the node.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use tessera_common::env::LogEntry;
use tessera_common::Result;

use crate::raft::node::Ready;
use crate::raft::state::HardState;

pub trait RaftStorage: Send {
    fn save_hard_state(&mut self, state: &HardState) -> Result<()>;

    fn load_hard_state(&self) -> Result<HardState>;

    fn append_entries(&mut self, entries: &[LogEntry]) -> Result<()>;

    /// Removes `from_index` and everything after it.
    fn truncate_log_from(&mut self, from_index: u64) -> Result<()>;

    fn load_log(&self) -> Result<Vec<LogEntry>>;
}

/// Writes the durable part of a `Ready` batch.
///
/// `ready.entries` starts at the lowest changed index, so the log is cut
/// there first and the entries appended after.
pub fn persist_ready(storage: &mut dyn RaftStorage, ready: &Ready) -> Result<()> {
    if let Some(hs) = &ready.hard_state {
        storage.save_hard_state(hs)?;
    }
    let cut = match (ready.truncate_from, ready.entries.first()) {
        (Some(t), Some(first)) => Some(t.min(first.index)),
        (Some(t), None) => Some(t),
        (None, Some(first)) => Some(first.index),
        (None, None) => None,
    };
    if let Some(from) = cut {
        storage.truncate_log_from(from)?;
    }
    if !ready.entries.is_empty() {
        storage.append_entries(&ready.entries)?;
    }
    Ok(())
}
