//! utils.rs
//!
//! Small shared helpers: node identifiers and wall-clock timestamps.

pub mod node_id;
pub use node_id::NodeId;

pub mod time;
