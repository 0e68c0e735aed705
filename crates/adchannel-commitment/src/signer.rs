//! Recoverable secp256k1 signatures over 32-byte digests.
//!
//! Every signature is made over `H(prefix ‖ digest)` where the prefix is the
//! ledger's signed-message convention, so the contract's `ecrecover` yields
//! the signer's address. Nonces are RFC 6979, so signing is deterministic.

use std::fmt;

use adchannel_types::{
    Address, Bytes32, ChannelError, ChannelIdentity, ImpressionId, Result, Root, SIGNATURE_LEN,
    Signature, constants::ETH_MESSAGE_PREFIX,
};
use secp256k1::{
    All, Message, PublicKey, Secp256k1, SecretKey,
    ecdsa::{RecoverableSignature, RecoveryId},
};
use sha3::{Digest, Keccak256};
use tracing::debug;

use crate::{fingerprint::fingerprint, hasher::keccak256};

/// `H(prefix ‖ digest)`: what is actually signed and recovered.
#[must_use]
pub fn prefixed_digest(digest: &Bytes32) -> Bytes32 {
    let mut hasher = Keccak256::new();
    hasher.update(ETH_MESSAGE_PREFIX);
    hasher.update(digest.as_bytes());
    Bytes32(hasher.finalize().into())
}

/// Last 20 bytes of `H(uncompressed pubkey without its tag byte)`.
fn address_of(public: &PublicKey) -> Address {
    let uncompressed = public.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash.0[12..]);
    Address(out)
}

/// A party's signing key and the address it controls.
#[derive(Clone)]
pub struct Keypair {
    secp: Secp256k1<All>,
    secret: SecretKey,
    address: Address,
}

impl Keypair {
    /// Fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        let secret = SecretKey::new(&mut rand::thread_rng());
        Self::from_secret(secret)
    }

    /// Load a key from its 32 secret bytes.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let secret = SecretKey::from_slice(bytes).map_err(|e| ChannelError::InvalidSecretKey {
            reason: e.to_string(),
        })?;
        Ok(Self::from_secret(secret))
    }

    /// Load a key from a `0x`-optional hex string.
    pub fn from_hex(raw: &str) -> Result<Self> {
        let digits = raw.strip_prefix("0x").unwrap_or(raw);
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(digits, &mut bytes).map_err(|e| ChannelError::InvalidSecretKey {
            reason: e.to_string(),
        })?;
        Self::from_secret_bytes(&bytes)
    }

    fn from_secret(secret: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let address = address_of(&PublicKey::from_secret_key(&secp, &secret));
        Self { secp, secret, address }
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign a 32-byte digest under the message prefix.
    #[must_use]
    pub fn sign(&self, digest: &Bytes32) -> Signature {
        let message = Message::from_digest(prefixed_digest(digest).0);
        let (recovery_id, compact) = self
            .secp
            .sign_ecdsa_recoverable(&message, &self.secret)
            .serialize_compact();
        let mut bytes = [0u8; SIGNATURE_LEN];
        bytes[..64].copy_from_slice(&compact);
        // recovery ids are 0..=3
        bytes[64] = 27 + u8::try_from(recovery_id.to_i32()).unwrap_or(0);
        Signature(bytes)
    }

    /// Sign a channel state: the fingerprint of `identity` with `root`.
    #[must_use]
    pub fn sign_state(&self, identity: &ChannelIdentity, root: &Root) -> Signature {
        self.sign(&fingerprint(identity, root))
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair").field("address", &self.address).finish_non_exhaustive()
    }
}

/// Address that produced `signature` over `digest`.
///
/// Malformed signatures recover to [`Address::ZERO`], which never matches a
/// real party, so callers compare instead of handling an error.
#[must_use]
pub fn recover(digest: &Bytes32, signature: &Signature) -> Address {
    let v = signature.v();
    let recid = match v {
        27 | 28 => v - 27,
        0 | 1 => v,
        _ => {
            debug!(v, "unrecoverable signature: bad v");
            return Address::ZERO;
        }
    };
    let recovered = RecoveryId::from_i32(i32::from(recid))
        .and_then(|id| RecoverableSignature::from_compact(&signature.0[..64], id))
        .and_then(|sig| {
            let message = Message::from_digest(prefixed_digest(digest).0);
            Secp256k1::verification_only().recover_ecdsa(&message, &sig)
        });
    match recovered {
        Ok(public) => address_of(&public),
        Err(e) => {
            debug!(error = %e, "unrecoverable signature");
            Address::ZERO
        }
    }
}

/// `recover(fingerprint(identity, root), signature) == expected`.
#[must_use]
pub fn verify_signature(
    identity: &ChannelIdentity,
    root: &Root,
    signature: &Signature,
    expected: &Address,
) -> bool {
    !expected.is_zero() && recover(&fingerprint(identity, root), signature) == *expected
}

/// The market's statement that it saw `impression_id`.
#[must_use]
pub fn attest(keypair: &Keypair, impression_id: &ImpressionId) -> Signature {
    keypair.sign(&keccak256(impression_id.as_bytes()))
}

/// Who attested to `impression_id` with `signature`.
#[must_use]
pub fn recover_attestation(impression_id: &ImpressionId, signature: &Signature) -> Address {
    recover(&keccak256(impression_id.as_bytes()), signature)
}

#[cfg(any(test, feature = "test-helpers"))]
impl Keypair {
    /// Deterministic key `[seed; 32]` for fixtures. `seed` must be non-zero.
    #[must_use]
    pub fn fixed(seed: u8) -> Self {
        Self::from_secret_bytes(&[seed; 32]).expect("fixture seed must be a valid scalar")
    }
}
