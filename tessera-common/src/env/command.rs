use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto::hash::digest;
use crate::error::TesseraError;

/// Domain a command belongs to. Each kind has its own event mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Governance,
    Bounty,
    Chat,
}

impl CommandKind {
    pub const ALL: [CommandKind; 3] = [CommandKind::Governance, CommandKind::Bounty, CommandKind::Chat];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Governance => "governance",
            CommandKind::Bounty => "bounty",
            CommandKind::Chat => "chat",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "governance" => Ok(CommandKind::Governance),
            "bounty" => Ok(CommandKind::Bounty),
            "chat" => Ok(CommandKind::Chat),
            other => Err(TesseraError::Other(format!("unknown command type: {}", other))),
        }
    }
}

/// A client request to be replicated and turned into evidence.
///
/// `idempotency_key` is chosen by the client and stays the same across
/// retries of the same logical operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub command_type: CommandKind,
    pub idempotency_key: String,
    #[serde(with = "hex::serde")]
    pub payload: Vec<u8>,
}

impl Command {
    pub fn new(command_type: CommandKind, idempotency_key: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            command_type,
            idempotency_key: idempotency_key.into(),
            payload: payload.into(),
        }
    }

    pub fn payload_hash(&self) -> String {
        digest(&self.payload)
    }
}
