use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tessera_common::env::Env;
use tessera_common::NodeId;

use crate::config::{ConfigError, NodeConfig, PeerConfig};

#[derive(Parser, Debug)]
#[command(name = "tessera-node")]
#[command(about = "Tessera consensus and evidence node")]
pub struct Cli {
    #[arg(short, long, value_name = "FILE", default_value = "config.json")]
    pub config: PathBuf,

    /// Overrides `node_id` from the config file.
    #[arg(long)]
    pub node_id: Option<String>,

    /// Overrides `listen_addr` from the config file.
    #[arg(long, value_name = "HOST:PORT")]
    pub listen: Option<String>,

    #[arg(long, value_parser = clap::value_parser!(Env))]
    pub env: Option<Env>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a config file and exit
    Init {
        #[arg(long)]
        node_id: String,

        #[arg(long, default_value = "127.0.0.1:7001")]
        listen: String,

        /// Other members as `id=http://host:port`
        #[arg(long = "peer", value_parser = parse_peer)]
        peers: Vec<PeerConfig>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    pub fn apply_overrides(&self, config: &mut NodeConfig) {
        if let Some(id) = &self.node_id {
            config.node_id = NodeId::from(id.as_str());
        }
        if let Some(listen) = &self.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(env) = self.env {
            config.env = env;
        }
    }
}

/// Builds the config written by `init`.
pub fn init_config(node_id: &str, listen: &str, peers: &[PeerConfig]) -> NodeConfig {
    let mut config = NodeConfig::single(NodeId::from(node_id), listen);
    config.cluster.nodes.extend(peers.iter().cloned());
    config
}

pub fn write_init_config(path: &PathBuf, config: &NodeConfig, force: bool) -> Result<(), ConfigError> {
    if path.exists() && !force {
        return Err(ConfigError::Invalid(format!(
            "{} already exists, pass --force to overwrite",
            path.display()
        )));
    }
    config.validate()?;
    config.save_to_file(path)
}

fn parse_peer(s: &str) -> Result<PeerConfig, String> {
    let (id, endpoint) = s
        .split_once('=')
        .ok_or_else(|| format!("expected id=endpoint, got '{}'", s))?;
    if id.is_empty() || endpoint.is_empty() {
        return Err(format!("expected id=endpoint, got '{}'", s));
    }
    Ok(PeerConfig {
        node_id: NodeId::from(id),
        endpoint: endpoint.to_string(),
    })
}
