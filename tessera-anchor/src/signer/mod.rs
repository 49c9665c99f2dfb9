//! Batch signers. The deployment `Env` picks one at construction time;
//! everything downstream only sees the [`Signer`] trait.

mod mock;
mod sphincs;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tessera_common::env::Env;
use tracing::info;

use crate::error::Result;

pub use mock::MockSigner;
pub use sphincs::SphincsSigner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerMode {
    Mock,
    Real,
}

impl fmt::Display for SignerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignerMode::Mock => f.write_str("mock"),
            SignerMode::Real => f.write_str("real"),
        }
    }
}

pub trait Signer: Send + Sync {
    fn mode(&self) -> SignerMode;

    fn public_key(&self) -> Vec<u8>;

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// Checks a detached signature produced by a signer of `mode`.
pub fn verify_signature(mode: SignerMode, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    match mode {
        SignerMode::Mock => MockSigner::verify(public_key, message, signature),
        SignerMode::Real => SphincsSigner::verify(public_key, message, signature),
    }
}

/// Dev gets the deterministic mock keyed by `seed`. Beta and mainnet get
/// SPHINCS+, with the keypair kept at `key_path` when one is given.
pub fn signer_for_env(env: Env, seed: &str, key_path: Option<&Path>) -> Result<Box<dyn Signer>> {
    let signer: Box<dyn Signer> = if env.uses_real_signer() {
        match key_path {
            Some(path) => Box::new(SphincsSigner::load_or_generate(path)?),
            None => Box::new(SphincsSigner::generate()),
        }
    } else {
        Box::new(MockSigner::new(seed))
    };
    info!("🔏 Anchor signer for env {}: {}", env, signer.mode());
    Ok(signer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_env_selects_mock_signer() {
        let signer = signer_for_env(Env::Dev, "n1", None).unwrap();
        assert_eq!(signer.mode(), SignerMode::Mock);
        let sig = signer.sign(b"root").unwrap();
        assert!(verify_signature(SignerMode::Mock, &signer.public_key(), b"root", &sig));
    }

    #[test]
    fn mode_mismatch_fails_verification() {
        let signer = MockSigner::new("n1");
        let sig = signer.sign(b"root").unwrap();
        assert!(!verify_signature(SignerMode::Real, &signer.public_key(), b"root", &sig));
    }

    #[test]
    fn signer_mode_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&SignerMode::Real).unwrap(), "\"real\"");
    }
}
