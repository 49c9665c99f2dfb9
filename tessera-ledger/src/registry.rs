//! Per-command-type mapping from a `Command` to evidence fields.
//!
//! The owner of each command type registers an [`EventMapper`]. Mapping
//! must be deterministic: every replica maps the same committed command to
//! the same fields.

use std::collections::BTreeMap;
use std::sync::Arc;

use tessera_common::env::{Command, CommandKind};

use crate::error::{LedgerError, Result};

pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFields {
    pub event_type: String,
    pub payload_hash: String,
}

pub trait EventMapper: Send + Sync {
    /// Cheap structural checks run on the leader before proposing.
    fn validate(&self, _command: &Command) -> std::result::Result<(), String> {
        Ok(())
    }

    fn map(&self, command: &Command) -> EventFields;
}

/// Records the payload digest under a fixed event type.
#[derive(Debug, Clone)]
pub struct DigestMapper {
    event_type: String,
    max_payload_bytes: usize,
}

impl DigestMapper {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            max_payload_bytes: MAX_PAYLOAD_BYTES,
        }
    }

    pub fn with_max_payload(mut self, bytes: usize) -> Self {
        self.max_payload_bytes = bytes;
        self
    }
}

impl EventMapper for DigestMapper {
    fn validate(&self, command: &Command) -> std::result::Result<(), String> {
        if command.payload.len() > self.max_payload_bytes {
            return Err(format!(
                "payload of {} bytes exceeds {} byte limit",
                command.payload.len(),
                self.max_payload_bytes
            ));
        }
        Ok(())
    }

    fn map(&self, command: &Command) -> EventFields {
        EventFields {
            event_type: self.event_type.clone(),
            payload_hash: command.payload_hash(),
        }
    }
}

#[derive(Clone, Default)]
pub struct MapperRegistry {
    mappers: BTreeMap<CommandKind, Arc<dyn EventMapper>>,
}

impl MapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Digest mappers for governance, bounty and chat.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(CommandKind::Governance, DigestMapper::new("governance.action"));
        registry.register(CommandKind::Bounty, DigestMapper::new("bounty.update"));
        registry.register(CommandKind::Chat, DigestMapper::new("chat.message"));
        registry
    }

    pub fn register(&mut self, kind: CommandKind, mapper: impl EventMapper + 'static) {
        self.mappers.insert(kind, Arc::new(mapper));
    }

    pub fn is_registered(&self, kind: CommandKind) -> bool {
        self.mappers.contains_key(&kind)
    }

    pub fn validate(&self, command: &Command) -> Result<()> {
        let key = &command.idempotency_key;
        if key.trim().is_empty() {
            return Err(LedgerError::Validation("idempotency_key must not be empty".into()));
        }
        if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(LedgerError::Validation(format!(
                "idempotency_key longer than {} bytes",
                MAX_IDEMPOTENCY_KEY_LEN
            )));
        }
        let mapper = self.mapper(command.command_type)?;
        mapper.validate(command).map_err(LedgerError::Validation)
    }

    pub fn map(&self, command: &Command) -> Result<EventFields> {
        Ok(self.mapper(command.command_type)?.map(command))
    }

    fn mapper(&self, kind: CommandKind) -> Result<&Arc<dyn EventMapper>> {
        self.mappers.get(&kind).ok_or(LedgerError::UnmappedCommand(kind))
    }
}
