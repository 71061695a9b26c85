//! Merkle audit-proof construction.
//!
//! The verifier receives the full leaf layer with the challenged position
//! replaced by the leaf's pre-image form, then repeatedly "wrapped toward the
//! root": every pair away from the challenged path collapses into its parent
//! hash, while the pair containing the path keeps both members with the
//! path-side one nested in a single-element array. The nesting tells the
//! verifier from which side the challenged leaf ascends.

use {
    farmer_crypto::ripemd160_sha256,
    serde_json::{Value, json},
};

#[derive(Debug, thiserror::Error)]
pub enum ProofError {
    #[error("challenged position {position} outside tree of {leaves} leaves")]
    Position { position: usize, leaves: usize },
    #[error("tree of {0} leaves is not a power of two")]
    NotBinary(usize),
    #[error("audit tree entry is not hex")]
    BadTree(#[from] hex::FromHexError),
    #[error("proof node is not a hash string")]
    Malformed,
}

/// Builds the proof for the leaf at `position`, whose raw (pre-lookup) hash
/// is `leaf_hash`.
pub fn build(trees: &[String], position: usize, leaf_hash: &[u8]) -> Result<Value, ProofError> {
    if position >= trees.len() {
        return Err(ProofError::Position {
            position,
            leaves: trees.len(),
        });
    }
    if !trees.len().is_power_of_two() {
        return Err(ProofError::NotBinary(trees.len()));
    }

    let mut proof: Vec<Value> = trees
        .iter()
        .map(|entry| Value::String(entry.clone()))
        .collect();
    proof[position] = Value::String(hex::encode(leaf_hash));
    // a single-leaf tree has nothing to wrap
    if proof.len() < 2 {
        return Ok(Value::Array(proof));
    }

    let mut position = position;
    while proof.len() != 2 {
        let mut next = Vec::with_capacity(proof.len() / 2);
        for (pair_index, pair) in proof.chunks(2).enumerate() {
            let (left, right) = (&pair[0], &pair[1]);
            let index = pair_index * 2;
            if index == position {
                next.push(json!([[left], right]));
            } else if index + 1 == position {
                next.push(json!([left, [right]]));
            } else {
                next.push(Value::String(combine(left, right)?));
            }
        }
        proof = next;
        position /= 2;
    }
    Ok(Value::Array(proof))
}

/// Parent hash of two sibling nodes away from the challenged path. Such nodes
/// are always plain hash strings; nested arrays only occur on the path
/// itself, which the position branches consume.
fn combine(left: &Value, right: &Value) -> Result<String, ProofError> {
    let left = left.as_str().ok_or(ProofError::Malformed)?;
    let right = right.as_str().ok_or(ProofError::Malformed)?;
    let joined = [hex::decode(left)?, hex::decode(right)?].concat();
    Ok(hex::encode(ripemd160_sha256(&joined)))
}
