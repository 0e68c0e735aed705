//! Fixed-width identifiers shared with the ledger contract.
//!
//! Addresses are 20 bytes and every root, channel id and impression id is a
//! 32-byte word. Both render as `0x`-prefixed lowercase hex and serialize as
//! hex strings so persisted snapshots stay human-readable.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ChannelError;

/// Decode a `0x`-prefixed hex string into exactly `N` bytes.
fn decode_prefixed<const N: usize>(s: &str) -> Result<[u8; N], ChannelError> {
    let digits = s.strip_prefix("0x").ok_or_else(|| ChannelError::InvalidEncoding {
        reason: format!("missing 0x prefix: {s}"),
    })?;
    if digits.len() != N * 2 {
        return Err(ChannelError::InvalidEncoding {
            reason: format!("expected {} hex digits, got {}", N * 2, digits.len()),
        });
    }
    let mut out = [0u8; N];
    hex::decode_to_slice(digits, &mut out).map_err(|e| ChannelError::InvalidEncoding {
        reason: e.to_string(),
    })?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A 20-byte ledger account address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Self = Self([0u8; 20]);

    #[must_use]
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// First four bytes as hex, for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_prefixed::<20>(s).map(Self)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Bytes32
// ---------------------------------------------------------------------------

/// A 32-byte word: merkle roots, fingerprints, leaf hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Default)]
pub struct Bytes32(pub [u8; 32]);

/// Merkle roots are plain 32-byte words.
pub type Root = Bytes32;

impl Bytes32 {
    pub const ZERO: Self = Self([0u8; 32]);

    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// First four bytes as hex, for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Bytes32 {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_prefixed::<32>(s).map(Self)
    }
}

impl Serialize for Bytes32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Bytes32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// ChannelId
// ---------------------------------------------------------------------------

/// Contract-assigned channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub Bytes32);

impl ChannelId {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch:{}", self.0.short())
    }
}

// ---------------------------------------------------------------------------
// ImpressionId
// ---------------------------------------------------------------------------

/// Unique identifier of one served impression.
///
/// The all-zero id is reserved for "no impression" (a freshly opened channel
/// has not applied any update yet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImpressionId(pub Bytes32);

impl ImpressionId {
    pub const NONE: Self = Self(Bytes32::ZERO);

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Whether this is a usable identifier (non-zero).
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_zero()
    }
}

impl fmt::Display for ImpressionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "imp:{}", self.0.short())
    }
}
