use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TesseraError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Consensus error: {0}")]
    Consensus(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other: {0}")]
    Other(String),
}

impl From<serde_json::Error> for TesseraError {
    fn from(e: serde_json::Error) -> Self {
        TesseraError::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for TesseraError {
    fn from(e: bincode::Error) -> Self {
        TesseraError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TesseraError>;

/// Wire-level error codes carried by `TxResult` and client replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotLeader,
    ValidationFailed,
    DuplicateEntry,
    Timeout,
    TermConflict,
    ClusterUnavailable,
    ChainCorruption,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotLeader => "NOT_LEADER",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::DuplicateEntry => "DUPLICATE_ENTRY",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::TermConflict => "TERM_CONFLICT",
            ErrorCode::ClusterUnavailable => "CLUSTER_UNAVAILABLE",
            ErrorCode::ChainCorruption => "CHAIN_CORRUPTION",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    /// Whether a client may retry the same command after seeing this code.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorCode::NotLeader | ErrorCode::Timeout | ErrorCode::TermConflict)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NOT_LEADER" => Ok(ErrorCode::NotLeader),
            "VALIDATION_FAILED" => Ok(ErrorCode::ValidationFailed),
            "DUPLICATE_ENTRY" => Ok(ErrorCode::DuplicateEntry),
            "TIMEOUT" => Ok(ErrorCode::Timeout),
            "TERM_CONFLICT" => Ok(ErrorCode::TermConflict),
            "CLUSTER_UNAVAILABLE" => Ok(ErrorCode::ClusterUnavailable),
            "CHAIN_CORRUPTION" => Ok(ErrorCode::ChainCorruption),
            "INTERNAL" => Ok(ErrorCode::Internal),
            other => Err(TesseraError::Other(format!("unknown error code: {}", other))),
        }
    }
}
