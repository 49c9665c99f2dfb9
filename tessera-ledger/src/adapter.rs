use std::sync::Arc;

use tessera_common::env::{EntryPayload, EventDraft, LedgerEvent, LogEntry};
use tracing::{debug, warn};

use crate::error::{LedgerError, Result};
use crate::evidence::EvidenceLog;
use crate::registry::MapperRegistry;

/// What applying one committed entry did to the evidence log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Appended(LedgerEvent),
    /// The key was already recorded; carries the original event.
    Duplicate { index: u64, original: LedgerEvent },
    /// Leader no-op, produces no evidence.
    Noop { index: u64 },
    /// At or below the resume point, already reflected in the log.
    AlreadyApplied { index: u64 },
    /// Committed, but no mapper accepted it.
    Unmapped { index: u64, idempotency_key: String, reason: String },
    /// Anchor marker for `[start_seq, end_seq]`, sealed in epoch `term`.
    Seal { index: u64, term: u64, start_seq: u64, end_seq: u64 },
}

impl ApplyOutcome {
    pub fn index(&self) -> u64 {
        match self {
            ApplyOutcome::Appended(e) => e.committed_index,
            ApplyOutcome::Duplicate { index, .. }
            | ApplyOutcome::Noop { index }
            | ApplyOutcome::AlreadyApplied { index }
            | ApplyOutcome::Unmapped { index, .. }
            | ApplyOutcome::Seal { index, .. } => *index,
        }
    }
}

/// Turns committed log entries into evidence events, exactly once and in
/// index order.
pub struct ConsensusEvidenceAdapter {
    log: EvidenceLog,
    registry: Arc<MapperRegistry>,
    last_applied_index: u64,
}

impl ConsensusEvidenceAdapter {
    /// Resumes after the last entry already reflected in `log`.
    pub fn new(log: EvidenceLog, registry: Arc<MapperRegistry>) -> Self {
        let last_applied_index = log.last().map(|e| e.committed_index).unwrap_or(0);
        Self {
            log,
            registry,
            last_applied_index,
        }
    }

    pub fn last_applied_index(&self) -> u64 {
        self.last_applied_index
    }

    /// Commit index of the newest recorded event, 0 when the log is empty.
    pub fn resume_point(&self) -> u64 {
        self.log.last().map(|e| e.committed_index).unwrap_or(0)
    }

    pub fn log(&self) -> &EvidenceLog {
        &self.log
    }

    pub fn registry(&self) -> &Arc<MapperRegistry> {
        &self.registry
    }

    pub async fn apply(&mut self, entry: &LogEntry) -> Result<ApplyOutcome> {
        if entry.index <= self.last_applied_index {
            return Ok(ApplyOutcome::AlreadyApplied { index: entry.index });
        }
        if entry.index != self.last_applied_index + 1 {
            return Err(LedgerError::Gap {
                expected: self.last_applied_index + 1,
                got: entry.index,
            });
        }

        let outcome = match &entry.payload {
            EntryPayload::Noop => ApplyOutcome::Noop { index: entry.index },
            EntryPayload::Seal { start_seq, end_seq } => ApplyOutcome::Seal {
                index: entry.index,
                term: entry.term,
                start_seq: *start_seq,
                end_seq: *end_seq,
            },
            EntryPayload::Command(command) => {
                if let Some(original) = self.log.find_by_key(&command.idempotency_key) {
                    debug!(
                        "index {} repeats key '{}' first recorded at seq {}",
                        entry.index, command.idempotency_key, original.sequence_number
                    );
                    ApplyOutcome::Duplicate {
                        index: entry.index,
                        original: original.clone(),
                    }
                } else {
                    match self.registry.map(command) {
                        Ok(fields) => {
                            let draft = EventDraft {
                                event_type: fields.event_type,
                                command_type: command.command_type,
                                idempotency_key: command.idempotency_key.clone(),
                                payload_hash: fields.payload_hash,
                                committed_term: entry.term,
                                committed_index: entry.index,
                            };
                            ApplyOutcome::Appended(self.log.append(draft).await?)
                        }
                        Err(e) => {
                            warn!("committed entry {} has no evidence mapping: {}", entry.index, e);
                            ApplyOutcome::Unmapped {
                                index: entry.index,
                                idempotency_key: command.idempotency_key.clone(),
                                reason: e.to_string(),
                            }
                        }
                    }
                }
            }
        };

        self.last_applied_index = entry.index;
        Ok(outcome)
    }

    pub async fn apply_all(&mut self, entries: &[LogEntry]) -> Result<Vec<ApplyOutcome>> {
        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            outcomes.push(self.apply(entry).await?);
        }
        Ok(outcomes)
    }
}
