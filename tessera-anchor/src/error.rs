use tessera_common::TesseraError;
use tessera_ledger::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnchorError {
    #[error("evidence log: {0}")]
    Ledger(#[from] LedgerError),

    #[error("batch {start}..={end} does not follow last sealed sequence {last_sealed}")]
    NotContiguous { start: u64, end: u64, last_sealed: u64 },

    #[error("batch covers {expected} events but {actual} were supplied")]
    RangeMismatch { expected: u64, actual: u64 },

    #[error("event {sequence} failed verification: {reason}")]
    BadEvent { sequence: u64, reason: String },

    #[error("merkle root mismatch: sealed {sealed}, recomputed {recomputed}")]
    RootMismatch { sealed: String, recomputed: String },

    #[error("signature does not verify")]
    BadSignature,

    #[error("key material: {0}")]
    Key(String),

    #[error(transparent)]
    Common(#[from] TesseraError),
}

impl From<std::io::Error> for AnchorError {
    fn from(e: std::io::Error) -> Self {
        AnchorError::Common(TesseraError::Io(e))
    }
}

impl From<serde_json::Error> for AnchorError {
    fn from(e: serde_json::Error) -> Self {
        AnchorError::Common(TesseraError::from(e))
    }
}

impl From<bincode::Error> for AnchorError {
    fn from(e: bincode::Error) -> Self {
        AnchorError::Common(TesseraError::from(e))
    }
}

pub type Result<T> = std::result::Result<T, AnchorError>;
