//! Domain types shared by consensus, the evidence log, anchoring and clients.

pub mod command;
pub mod deployment;
pub mod entry;
pub mod event;
pub mod rpc;
pub mod status;
pub mod tx_result;

pub use command::{Command, CommandKind};
pub use deployment::Env;
pub use entry::{EntryPayload, LogEntry};
pub use event::{EventDraft, LedgerEvent};
pub use rpc::SubmitReply;
pub use status::{ClusterStatus, NodeInfo};
pub use tx_result::TxResult;
