use tessera_common::crypto::hash::digest_parts;

use super::{Signer, SignerMode};
use crate::error::Result;

const DOMAIN: &[u8] = b"tessera-mock:";

/// Deterministic hash-based stand-in. The "public key" is derived from the
/// seed and the signature is `H(pk || message)`, so anyone holding the
/// public key can check it and replays produce identical bytes.
#[derive(Debug, Clone)]
pub struct MockSigner {
    public_key: [u8; 32],
}

impl MockSigner {
    pub fn new(seed: &str) -> Self {
        Self {
            public_key: digest_parts(&[DOMAIN, seed.as_bytes()]),
        }
    }

    pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        public_key.len() == 32 && digest_parts(&[public_key, message]).as_slice() == signature
    }
}

impl Signer for MockSigner {
    fn mode(&self) -> SignerMode {
        SignerMode::Mock
    }

    fn public_key(&self) -> Vec<u8> {
        self.public_key.to_vec()
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(digest_parts(&[self.public_key.as_slice(), message]).to_vec())
    }
}
