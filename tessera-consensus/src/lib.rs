pub mod error;
pub mod network;
pub mod raft;
pub mod storage;

pub use error::ConsensusError;
pub use raft::config::RaftConfig;
pub use raft::message::{Envelope, RaftMessage};
pub use raft::node::{RaftNode, Ready};
pub use raft::state::{HardState, Role};
pub use storage::RaftStorage;
