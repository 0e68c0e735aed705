//! # adchannel-commitment
//!
//! **Commitment codec for AdChannel.**
//!
//! Everything a counterparty or the ledger contract must be able to
//! re-derive bit for bit lives here:
//!
//! - **Leaf hashing**: Keccak-256 over canonical 32-byte / 20-byte encodings
//! - **Merkle roots**: 5 fixed leaves, pairwise hashing, odd-node duplication
//! - **Fingerprints**: `H(contract ‖ channel ‖ demand ‖ supply ‖ root)`
//! - **Signatures**: recoverable secp256k1 under the ledger message prefix
//!
//! All functions are pure. Identical inputs always produce identical bytes.

pub mod fingerprint;
#[cfg(any(test, feature = "test-helpers"))]
pub mod fixtures;
pub mod hasher;
pub mod merkle;
pub mod signer;

pub use fingerprint::fingerprint;
pub use hasher::{LeafValue, hash_leaf, hash_pair, keccak256, parse_leaf};
pub use merkle::{leaves, merkle_proof, merkle_root, update_root, verify_proof};
pub use signer::{
    Keypair, attest, prefixed_digest, recover, recover_attestation, verify_signature,
};
