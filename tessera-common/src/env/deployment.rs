use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Deployment environment. Selects the batch signer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Env {
    #[default]
    Dev,
    Beta,
    Mainnet,
}

impl Env {
    /// Dev uses the deterministic mock signer, everything else signs for real.
    pub fn uses_real_signer(&self) -> bool {
        !matches!(self, Env::Dev)
    }
}

impl fmt::Display for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Env::Dev => "dev",
            Env::Beta => "beta",
            Env::Mainnet => "mainnet",
        };
        f.write_str(s)
    }
}

impl FromStr for Env {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" => Ok(Env::Dev),
            "beta" => Ok(Env::Beta),
            "mainnet" => Ok(Env::Mainnet),
            other => Err(format!("unknown env '{}', expected dev|beta|mainnet", other)),
        }
    }
}
