//! Recoverable secp256k1 signature bytes.
//!
//! Layout is `r (32) || s (32) || v (1)` with `v` in `{27, 28}`, the form the
//! ledger contract's `ecrecover` expects. Producing and recovering
//! signatures lives in `adchannel-commitment`; this type only carries bytes.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ChannelError;

/// Length of an encoded recoverable signature.
pub const SIGNATURE_LEN: usize = 65;

/// A 65-byte recoverable signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; SIGNATURE_LEN]);

impl Signature {
    #[must_use]
    pub fn from_bytes(bytes: [u8; SIGNATURE_LEN]) -> Self {
        Self(bytes)
    }

    /// Build from a slice, rejecting anything that is not exactly 65 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ChannelError> {
        let arr: [u8; SIGNATURE_LEN] =
            bytes.try_into().map_err(|_| ChannelError::MalformedSignature {
                reason: format!("expected {SIGNATURE_LEN} bytes, got {}", bytes.len()),
            })?;
        Ok(Self(arr))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }

    #[must_use]
    pub fn r(&self) -> &[u8] {
        &self.0[..32]
    }

    #[must_use]
    pub fn s(&self) -> &[u8] {
        &self.0[32..64]
    }

    #[must_use]
    pub fn v(&self) -> u8 {
        self.0[64]
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(0x{}..)", hex::encode(&self.0[..6]))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Signature {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|e| ChannelError::MalformedSignature {
            reason: e.to_string(),
        })?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
