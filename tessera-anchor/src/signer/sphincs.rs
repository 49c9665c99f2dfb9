use std::fs;
use std::path::Path;

use pqcrypto_sphincsplus::sphincssha2128fsimple as sphincs;
use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _, SecretKey as _};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Signer, SignerMode};
use crate::error::{AnchorError, Result};

/// SPHINCS+-SHA2-128f-simple, stateless hash-based post-quantum signatures.
pub struct SphincsSigner {
    public_key: sphincs::PublicKey,
    secret_key: sphincs::SecretKey,
}

#[derive(Serialize, Deserialize)]
struct KeyFile {
    #[serde(with = "hex::serde")]
    public_key: Vec<u8>,
    #[serde(with = "hex::serde")]
    secret_key: Vec<u8>,
}

impl SphincsSigner {
    pub fn generate() -> Self {
        let (public_key, secret_key) = sphincs::keypair();
        Self { public_key, secret_key }
    }

    /// Reads the keypair at `path`, or creates and stores a fresh one.
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = fs::read_to_string(path)?;
            let file: KeyFile = serde_json::from_str(&raw)?;
            let public_key = sphincs::PublicKey::from_bytes(&file.public_key)
                .map_err(|e| AnchorError::Key(format!("public key: {:?}", e)))?;
            let secret_key = sphincs::SecretKey::from_bytes(&file.secret_key)
                .map_err(|e| AnchorError::Key(format!("secret key: {:?}", e)))?;
            info!("Loaded SPHINCS+ anchor key from {:?}", path);
            return Ok(Self { public_key, secret_key });
        }

        let signer = Self::generate();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = KeyFile {
            public_key: signer.public_key.as_bytes().to_vec(),
            secret_key: signer.secret_key.as_bytes().to_vec(),
        };
        fs::write(path, serde_json::to_vec_pretty(&file)?)?;
        info!("🔑 Generated SPHINCS+ anchor key at {:?}", path);
        Ok(signer)
    }

    pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        let Ok(pk) = sphincs::PublicKey::from_bytes(public_key) else {
            return false;
        };
        let Ok(sig) = sphincs::DetachedSignature::from_bytes(signature) else {
            return false;
        };
        sphincs::verify_detached_signature(&sig, message, &pk).is_ok()
    }
}

impl Signer for SphincsSigner {
    fn mode(&self) -> SignerMode {
        SignerMode::Real
    }

    fn public_key(&self) -> Vec<u8> {
        self.public_key.as_bytes().to_vec()
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(sphincs::detached_sign(message, &self.secret_key).as_bytes().to_vec())
    }
}
