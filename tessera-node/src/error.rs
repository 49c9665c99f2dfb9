use tessera_anchor::AnchorError;
use tessera_common::TesseraError;
use tessera_consensus::ConsensusError;
use tessera_ledger::LedgerError;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Anchor(#[from] AnchorError),

    #[error(transparent)]
    Storage(#[from] TesseraError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The evidence chain failed verification; the node stopped serving.
    #[error("node halted: {0}")]
    Halted(String),

    #[error("node is shutting down")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, NodeError>;
