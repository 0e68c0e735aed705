//! Channel fingerprints: the 32-byte statement a party signs.

use adchannel_types::{Bytes32, ChannelIdentity, Root};
use sha3::{Digest, Keccak256};

/// `H(contractId ‖ channelId ‖ demand ‖ supply ‖ root)`, tightly packed.
///
/// Field order is fixed; the contract recomputes exactly these 124 bytes.
#[must_use]
pub fn fingerprint(identity: &ChannelIdentity, root: &Root) -> Bytes32 {
    let mut hasher = Keccak256::new();
    hasher.update(identity.contract_id.as_bytes());
    hasher.update(identity.channel_id.as_bytes());
    hasher.update(identity.demand.as_bytes());
    hasher.update(identity.supply.as_bytes());
    hasher.update(root.as_bytes());
    Bytes32(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use adchannel_types::Address;

    use super::*;
    use crate::keccak256;

    #[test]
    fn matches_packed_concatenation() {
        let id = ChannelIdentity::dummy();
        let root = Bytes32([0x44; 32]);
        let mut packed = Vec::with_capacity(124);
        packed.extend_from_slice(id.contract_id.as_bytes());
        packed.extend_from_slice(id.channel_id.as_bytes());
        packed.extend_from_slice(id.demand.as_bytes());
        packed.extend_from_slice(id.supply.as_bytes());
        packed.extend_from_slice(root.as_bytes());
        assert_eq!(packed.len(), 124);
        assert_eq!(fingerprint(&id, &root), keccak256(&packed));
    }

    #[test]
    fn swapping_parties_changes_fingerprint() {
        let id = ChannelIdentity::dummy();
        let swapped = ChannelIdentity {
            demand: id.supply,
            supply: id.demand,
            ..id
        };
        assert_ne!(
            fingerprint(&id, &Root::ZERO),
            fingerprint(&swapped, &Root::ZERO)
        );
    }

    #[test]
    fn contract_binds_fingerprint() {
        let id = ChannelIdentity::dummy();
        let other = ChannelIdentity {
            contract_id: Address([0x13; 20]),
            ..id
        };
        assert_ne!(fingerprint(&id, &Root::ZERO), fingerprint(&other, &Root::ZERO));
    }
}
