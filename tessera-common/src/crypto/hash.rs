use sha2::{Digest, Sha256};

/// Previous-hash value of the first event in a chain.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Computes the SHA-256 digest of the given data and returns it as a hex string.
pub fn digest(data: &[u8]) -> String {
    hex::encode(digest_bytes(data))
}

/// Raw 32-byte SHA-256 digest.
pub fn digest_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hashes several byte slices as one stream.
pub fn digest_parts(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Decodes a 64-char hex digest into its 32 raw bytes.
pub fn decode_hash(hex_hash: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(hex_hash).ok()?;
    bytes.try_into().ok()
}
