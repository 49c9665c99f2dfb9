use rs_merkle::{algorithms::Sha256, MerkleProof, MerkleTree};
use serde::{Deserialize, Serialize};

use crate::crypto::hash::{decode_hash, ZERO_HASH};
use crate::error::{Result, TesseraError};

/// Calculates the Merkle root over hex-encoded 32-byte leaves.
///
/// Leaves are used as-is (they are already SHA-256 digests). An empty
/// leaf set has the all-zero root.
pub fn merkle_root(leaves: &[String]) -> Result<String> {
    if leaves.is_empty() {
        return Ok(ZERO_HASH.to_string());
    }
    let tree = build_tree(leaves)?;
    Ok(tree.root_hex().unwrap_or_else(|| ZERO_HASH.to_string()))
}

/// Audit path proving one leaf belongs to a root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    pub leaf_index: usize,
    pub total_leaves: usize,
    pub proof_hashes: Vec<String>,
}

pub fn prove_inclusion(leaves: &[String], leaf_index: usize) -> Result<InclusionProof> {
    if leaf_index >= leaves.len() {
        return Err(TesseraError::Other(format!(
            "leaf {} out of range ({} leaves)",
            leaf_index,
            leaves.len()
        )));
    }
    let tree = build_tree(leaves)?;
    let proof = tree.proof(&[leaf_index]);
    Ok(InclusionProof {
        leaf_index,
        total_leaves: leaves.len(),
        proof_hashes: proof.proof_hashes().iter().map(hex::encode).collect(),
    })
}

/// Checks `leaf` against `root` using the audit path. Malformed hex fails
/// verification rather than erroring.
pub fn verify_inclusion(root: &str, leaf: &str, proof: &InclusionProof) -> bool {
    let (Some(root), Some(leaf)) = (decode_hash(root), decode_hash(leaf)) else {
        return false;
    };
    let hashes: Option<Vec<[u8; 32]>> = proof.proof_hashes.iter().map(|h| decode_hash(h)).collect();
    let Some(hashes) = hashes else {
        return false;
    };
    MerkleProof::<Sha256>::new(hashes).verify(root, &[proof.leaf_index], &[leaf], proof.total_leaves)
}

fn build_tree(leaves: &[String]) -> Result<MerkleTree<Sha256>> {
    let decoded = leaves
        .iter()
        .map(|l| decode_hash(l).ok_or_else(|| TesseraError::Other(format!("invalid leaf hash: {}", l))))
        .collect::<Result<Vec<[u8; 32]>>>()?;
    Ok(MerkleTree::<Sha256>::from_leaves(&decoded))
}
