//! Client side of a Tessera cluster.
//!
//! [`ClusterAdapter`] is what applications hold: it finds the leader,
//! retries transient failures and returns the node's `TxResult`.

pub mod adapter;
pub mod client;
pub mod error;

pub use adapter::{ClusterAdapter, LeaderHint, RetryPolicy};
pub use client::{HttpNodeClient, NodeClient};
pub use error::{ClientError, ClusterError};
