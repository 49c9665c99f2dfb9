//! Raft replication as a pure, tick-driven state machine.
//!
//! [`node::RaftNode`] never does I/O. The caller feeds it ticks and inbound
//! envelopes, then drains a [`node::Ready`] batch: persist the hard state
//! and entries, send the messages, apply the committed entries. Everything
//! async (timers, sockets, disks) lives in the node runtime.

pub mod config;
pub mod log;
pub mod message;
pub mod node;
pub mod state;
