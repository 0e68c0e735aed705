//! Canonical leaf hashing.
//!
//! Every value committed into a root is first brought into one canonical
//! byte form so both parties (and the contract) hash the same bytes:
//! numbers become 32-byte big-endian words, addresses stay 20 raw bytes,
//! words stay 32 raw bytes.

use adchannel_types::{Address, Bytes32, ChannelError, Result, U256};
use sha3::{Digest, Keccak256};

/// Keccak-256 over a byte string.
#[must_use]
pub fn keccak256(data: &[u8]) -> Bytes32 {
    Bytes32(Keccak256::digest(data).into())
}

/// `H(left ‖ right)`, the merkle interior-node rule.
#[must_use]
pub fn hash_pair(left: &Bytes32, right: &Bytes32) -> Bytes32 {
    let mut hasher = Keccak256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Bytes32(hasher.finalize().into())
}

/// A value in canonical, typed form, ready to hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafValue {
    /// Ledger integer, padded to 32 bytes big-endian.
    Number(U256),
    /// 32-byte word hashed as-is (ids, roots).
    Word(Bytes32),
    /// 20-byte address hashed as-is.
    Address(Address),
}

impl From<U256> for LeafValue {
    fn from(n: U256) -> Self {
        Self::Number(n)
    }
}

impl From<Bytes32> for LeafValue {
    fn from(w: Bytes32) -> Self {
        Self::Word(w)
    }
}

impl From<Address> for LeafValue {
    fn from(a: Address) -> Self {
        Self::Address(a)
    }
}

/// Hash one canonical leaf value.
#[must_use]
pub fn hash_leaf(value: LeafValue) -> Bytes32 {
    match value {
        LeafValue::Number(n) => {
            let mut word = [0u8; 32];
            n.to_big_endian(&mut word);
            keccak256(&word)
        }
        LeafValue::Word(w) => keccak256(w.as_bytes()),
        LeafValue::Address(a) => keccak256(a.as_bytes()),
    }
}

/// Canonicalize a textual value.
///
/// Accepted forms: decimal digits (number), `0x` + 40 hex digits (address),
/// `0x` + 64 hex digits (word). Anything else is rejected before hashing.
pub fn parse_leaf(raw: &str) -> Result<LeafValue> {
    if let Some(digits) = raw.strip_prefix("0x") {
        return match digits.len() {
            40 => raw.parse::<Address>().map(LeafValue::Address),
            64 => raw.parse::<Bytes32>().map(LeafValue::Word),
            n => Err(ChannelError::InvalidEncoding {
                reason: format!("hex value must be 40 or 64 digits, got {n}"),
            }),
        };
    }
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ChannelError::InvalidEncoding {
            reason: format!("not a decimal or 0x-hex value: {raw:?}"),
        });
    }
    U256::from_dec_str(raw)
        .map(LeafValue::Number)
        .map_err(|e| ChannelError::InvalidEncoding {
            reason: format!("{raw}: {e:?}"),
        })
}
