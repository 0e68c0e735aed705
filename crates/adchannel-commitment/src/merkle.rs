//! Fixed binary merkle construction over an update's five leaves.
//!
//! Layers are reduced pairwise with `H(left ‖ right)`. A layer with an odd
//! number of nodes pairs its last node with itself. Leaf positions used by
//! proofs are 1-based, matching the contract's verifier.

use adchannel_types::{Bytes32, ChannelError, Result, Root, Update, constants::LEAF_COUNT};

use crate::hasher::{LeafValue, hash_leaf, hash_pair};

/// `[H(impressionId), H(price), H(impressions), H(balance), H(prevRoot)]`.
#[must_use]
pub fn leaves(update: &Update, prev_root: &Root) -> [Bytes32; LEAF_COUNT] {
    [
        hash_leaf(LeafValue::Word(update.impression_id.0)),
        hash_leaf(LeafValue::Number(update.price)),
        hash_leaf(LeafValue::Number(update.impressions)),
        hash_leaf(LeafValue::Number(update.balance)),
        hash_leaf(LeafValue::Word(*prev_root)),
    ]
}

/// Root of the update's leaves chained onto `prev_root`.
#[must_use]
pub fn update_root(update: &Update, prev_root: &Root) -> Root {
    merkle_root(&leaves(update, prev_root))
}

fn next_layer(layer: &[Bytes32]) -> Vec<Bytes32> {
    layer
        .chunks(2)
        .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
        .collect()
}

/// Merkle root over `leaves`. An empty set has the zero root.
#[must_use]
pub fn merkle_root(leaves: &[Bytes32]) -> Root {
    if leaves.is_empty() {
        return Root::ZERO;
    }
    let mut layer = leaves.to_vec();
    while layer.len() > 1 {
        layer = next_layer(&layer);
    }
    layer[0]
}

/// Sibling path for the leaf at 1-based `index`, bottom layer first.
pub fn merkle_proof(leaves: &[Bytes32], index: u64) -> Result<Vec<Bytes32>> {
    let pos = usize::try_from(index)
        .ok()
        .and_then(|i| i.checked_sub(1))
        .filter(|p| *p < leaves.len())
        .ok_or_else(|| ChannelError::ProofRejected {
            reason: format!("leaf index {index} outside 1..={}", leaves.len()),
        })?;

    let mut proof = Vec::new();
    let mut pos = pos;
    let mut layer = leaves.to_vec();
    while layer.len() > 1 {
        let sibling = if pos % 2 == 0 {
            layer.get(pos + 1).unwrap_or(&layer[pos])
        } else {
            &layer[pos - 1]
        };
        proof.push(*sibling);
        layer = next_layer(&layer);
        pos /= 2;
    }
    Ok(proof)
}

/// Whether `proof` authenticates `leaf` at 1-based `index` under `root`.
#[must_use]
pub fn verify_proof(proof: &[Bytes32], root: &Root, leaf: &Bytes32, index: u64) -> bool {
    let Some(mut pos) = index.checked_sub(1) else {
        return false;
    };
    let mut node = *leaf;
    for sibling in proof {
        node = if pos % 2 == 0 {
            hash_pair(&node, sibling)
        } else {
            hash_pair(sibling, &node)
        };
        pos /= 2;
    }
    pos == 0 && node == *root
}
