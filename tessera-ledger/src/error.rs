use tessera_common::env::CommandKind;
use tessera_common::TesseraError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The hash chain does not verify. Never retried; the node halts.
    #[error("chain corruption at sequence {sequence}: {reason}")]
    ChainCorruption { sequence: u64, reason: String },

    #[error("sequence range {start}..={end} is outside the log (len {len})")]
    OutOfRange { start: u64, end: u64, len: u64 },

    #[error("committed index {index} does not follow last recorded index {last}")]
    OutOfOrder { index: u64, last: u64 },

    #[error("gap in committed entries: expected index {expected}, got {got}")]
    Gap { expected: u64, got: u64 },

    #[error("idempotency key '{0}' is already recorded")]
    DuplicateKey(String),

    #[error("no event mapper registered for command type '{0}'")]
    UnmappedCommand(CommandKind),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[from] TesseraError),
}

impl LedgerError {
    pub fn is_corruption(&self) -> bool {
        matches!(self, LedgerError::ChainCorruption { .. })
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(e: std::io::Error) -> Self {
        LedgerError::Storage(TesseraError::Io(e))
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Storage(TesseraError::from(e))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
