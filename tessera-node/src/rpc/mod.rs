//! HTTP surface of a node: the client API and the raft peer endpoint.

pub mod server;
pub mod transport;

pub use server::{router, serve, start_rpc_server};
pub use transport::HttpTransport;

/// Path peers post envelopes to.
pub const RAFT_PATH: &str = "/v1/raft";
