use serde::{Deserialize, Serialize};

use crate::utils::NodeId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: NodeId,
    pub endpoint: String,
    pub is_leader: bool,
    pub is_reachable: bool,
    /// Last time the reporting node heard from this member (ms since epoch).
    pub last_heartbeat: Option<i64>,
}

/// Cluster view as reported by one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub reporting_node: NodeId,
    pub leader_node_id: Option<NodeId>,
    pub leader_endpoint: Option<String>,
    pub current_term: u64,
    pub commit_index: u64,
    pub nodes: Vec<NodeInfo>,
}

impl ClusterStatus {
    pub fn has_leader(&self) -> bool {
        self.leader_node_id.is_some()
    }

    pub fn reachable_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_reachable).count()
    }
}
