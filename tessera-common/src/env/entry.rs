use serde::{Deserialize, Serialize};

use super::command::Command;

/// What a replicated log slot carries.
///
/// `Noop` is appended by every new leader so entries from earlier terms
/// can be committed; it never becomes evidence. `Seal` marks the evidence
/// range `[start_seq, end_seq]` as anchored in the entry's term, so every
/// replica agrees on what has been sealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryPayload {
    Noop,
    Command(Command),
    Seal { start_seq: u64, end_seq: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub index: u64,
    pub payload: EntryPayload,
}

impl LogEntry {
    pub fn noop(term: u64, index: u64) -> Self {
        Self { term, index, payload: EntryPayload::Noop }
    }

    pub fn command(term: u64, index: u64, command: Command) -> Self {
        Self { term, index, payload: EntryPayload::Command(command) }
    }

    pub fn seal(term: u64, index: u64, start_seq: u64, end_seq: u64) -> Self {
        Self { term, index, payload: EntryPayload::Seal { start_seq, end_seq } }
    }

    pub fn as_command(&self) -> Option<&Command> {
        match &self.payload {
            EntryPayload::Command(cmd) => Some(cmd),
            EntryPayload::Noop | EntryPayload::Seal { .. } => None,
        }
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.as_command().map(|c| c.idempotency_key.as_str())
    }
}
