use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::{fs, io};

use serde::{Deserialize, Serialize};
use tessera_anchor::AnchorConfig;
use tessera_common::env::Env;
use tessera_common::NodeId;
use tessera_consensus::RaftConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] io::Error),

    #[error("config parse: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub node_id: NodeId,
    pub endpoint: String,
}

/// Cluster-wide settings. Every node of a cluster should carry the same
/// values here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub nodes: Vec<PeerConfig>,
    /// `[min, max]` in ticks.
    pub election_timeout_range: [u64; 2],
    pub heartbeat_interval: u64,
    pub tick_interval_ms: u64,
    pub rpc_timeout_ms: u64,
    pub batch_anchor_size: u64,
    pub anchor_interval_ticks: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            election_timeout_range: [150, 300],
            heartbeat_interval: 50,
            tick_interval_ms: 1,
            rpc_timeout_ms: 500,
            batch_anchor_size: 100,
            anchor_interval_ticks: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: NodeId,
    pub listen_addr: String,
    /// Where raft state, evidence and anchors live. Unset keeps everything
    /// in memory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: Env,
    #[serde(default)]
    pub cluster: ClusterConfig,
}

impl NodeConfig {
    /// A one-node cluster listening on `listen_addr`.
    pub fn single(node_id: NodeId, listen_addr: &str) -> Self {
        let cluster = ClusterConfig {
            nodes: vec![PeerConfig {
                node_id: node_id.clone(),
                endpoint: format!("http://{}", listen_addr),
            }],
            ..ClusterConfig::default()
        };
        Self {
            data_dir: Some(PathBuf::from("data").join(node_id.as_str())),
            node_id,
            listen_addr: listen_addr.to_string(),
            env: Env::Dev,
            cluster,
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.cluster;
        if c.nodes.is_empty() {
            return Err(ConfigError::Invalid("cluster.nodes is empty".into()));
        }
        let mut seen = HashSet::new();
        for peer in &c.nodes {
            if !seen.insert(&peer.node_id) {
                return Err(ConfigError::Invalid(format!("duplicate node id {}", peer.node_id)));
            }
        }
        if !seen.contains(&self.node_id) {
            return Err(ConfigError::Invalid(format!(
                "node {} is not a member of cluster.nodes",
                self.node_id
            )));
        }
        let [min, max] = c.election_timeout_range;
        if min == 0 || min > max {
            return Err(ConfigError::Invalid(format!("bad election_timeout_range [{}, {}]", min, max)));
        }
        if c.heartbeat_interval == 0 || c.heartbeat_interval >= min {
            return Err(ConfigError::Invalid(format!(
                "heartbeat_interval {} must be positive and below election timeout {}",
                c.heartbeat_interval, min
            )));
        }
        if c.batch_anchor_size == 0 {
            return Err(ConfigError::Invalid("batch_anchor_size must be positive".into()));
        }
        if c.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn members(&self) -> Vec<NodeId> {
        self.cluster.nodes.iter().map(|p| p.node_id.clone()).collect()
    }

    pub fn endpoint_of(&self, id: &NodeId) -> Option<&str> {
        self.cluster
            .nodes
            .iter()
            .find(|p| &p.node_id == id)
            .map(|p| p.endpoint.as_str())
    }

    pub fn raft_config(&self) -> RaftConfig {
        RaftConfig {
            election_timeout_min: self.cluster.election_timeout_range[0],
            election_timeout_max: self.cluster.election_timeout_range[1],
            heartbeat_interval: self.cluster.heartbeat_interval,
            ..RaftConfig::default()
        }
    }

    pub fn anchor_config(&self) -> AnchorConfig {
        AnchorConfig {
            batch_size: self.cluster.batch_anchor_size,
            interval_ticks: self.cluster.anchor_interval_ticks,
        }
    }
}
