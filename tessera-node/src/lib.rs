pub mod cli;
pub mod config;
pub mod error;
pub mod rpc;
pub mod runtime;

pub use config::{ClusterConfig, NodeConfig, PeerConfig};
pub use error::{NodeError, Result};
pub use runtime::{NodeBuilder, NodeHandle, NodeRuntime};
