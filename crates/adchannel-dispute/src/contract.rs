//! The ledger contract surface.
//!
//! Every mutating call names its `caller`, the address the transaction is
//! sent from. Calls either apply completely or fail with no effect on
//! channel state.

use adchannel_commitment::{LeafValue, hash_leaf, verify_proof};
use adchannel_types::{
    Address, ChallengeRecord, ChannelError, ChannelId, ChannelRecord, ImpressionsClaim, Result,
    Root, SignedRoot, constants::IMPRESSIONS_LEAF_INDEX,
};

/// Operations offered by the channel contract.
pub trait LedgerContract {
    /// Height of the latest mined block.
    fn block_number(&self) -> u64;

    /// Owner-only: admit a demand party with its endpoint URL.
    fn register_demand(&mut self, caller: Address, demand: Address, url: &str) -> Result<()>;

    /// Owner-only: admit a supply party with its endpoint URL.
    fn register_supply(&mut self, caller: Address, supply: Address, url: &str) -> Result<()>;

    fn deregister_demand(&mut self, caller: Address, demand: Address) -> Result<()>;

    fn deregister_supply(&mut self, caller: Address, supply: Address) -> Result<()>;

    /// A registered demand party changes its own URL.
    fn update_demand_url(&mut self, caller: Address, url: &str) -> Result<()>;

    /// A registered supply party changes its own URL.
    fn update_supply_url(&mut self, caller: Address, url: &str) -> Result<()>;

    fn registered_demand(&self, demand: &Address) -> Option<&str>;

    fn registered_supply(&self, supply: &Address) -> Option<&str>;

    /// A registered demand opens a channel to a registered supply.
    fn open_channel(&mut self, caller: Address, supply: Address) -> Result<ChannelId>;

    /// Propose `proposal.root` as the next checkpoint.
    ///
    /// `claim`, when given, proves the root's impression count; without it
    /// the proposal counts as zero impressions.
    fn propose_checkpoint(
        &mut self,
        caller: Address,
        channel_id: &ChannelId,
        proposal: &SignedRoot,
        renew: bool,
        claim: Option<&ImpressionsClaim>,
    ) -> Result<()>;

    /// Commit the pending checkpoint once its challenge window has passed.
    fn checkpoint_channel(&mut self, caller: Address, channel_id: &ChannelId) -> Result<()>;

    /// Counter a pending proposal with a counterparty-signed root that
    /// provably carries more impressions.
    fn challenge_checkpoint(
        &mut self,
        caller: Address,
        channel_id: &ChannelId,
        evidence: &SignedRoot,
        claim: &ImpressionsClaim,
    ) -> Result<()>;

    /// Proposer's answer to a challenge: a proof of more impressions than
    /// the challenge, under the proposed root or a `superseding` one.
    fn accept_challenge(
        &mut self,
        caller: Address,
        channel_id: &ChannelId,
        claim: &ImpressionsClaim,
        superseding: Option<&SignedRoot>,
    ) -> Result<()>;

    fn get_channel(&self, channel_id: &ChannelId) -> Result<ChannelRecord>;

    /// The open challenge on a channel, if any.
    fn get_challenge(&self, channel_id: &ChannelId) -> Result<Option<ChallengeRecord>>;
}

/// Check that `claim` proves its impression count under `root`.
///
/// # Errors
/// `ProofRejected` if the claim does not point at the impression-count leaf
/// or its proof does not fold up to `root`.
pub fn verify_claim(root: &Root, claim: &ImpressionsClaim) -> Result<()> {
    if claim.index != IMPRESSIONS_LEAF_INDEX {
        return Err(ChannelError::ProofRejected {
            reason: format!(
                "leaf index {} is not the impression count (index {IMPRESSIONS_LEAF_INDEX})",
                claim.index
            ),
        });
    }
    let leaf = hash_leaf(LeafValue::Number(claim.impressions));
    if verify_proof(&claim.proof, root, &leaf, claim.index) {
        Ok(())
    } else {
        Err(ChannelError::ProofRejected {
            reason: format!("proof does not bind {} impressions to {root}", claim.impressions),
        })
    }
}

#[cfg(test)]
mod tests {
    use adchannel_commitment::{leaves, merkle_proof};
    use adchannel_types::{Bytes32, ChannelIdentity, ImpressionId, U256, Update};

    use super::*;

    fn update(impressions: u64) -> Update {
        Update {
            identity: ChannelIdentity::dummy(),
            impression_id: ImpressionId(Bytes32([4; 32])),
            price: U256::from(2),
            impressions: U256::from(impressions),
            balance: U256::from(impressions * 2),
            root: Root::ZERO,
            prev_root: Bytes32([8; 32]),
            signature: None,
        }
    }

    fn claim_for(u: &Update) -> (Root, ImpressionsClaim) {
        let l = leaves(u, &u.prev_root);
        let root = adchannel_commitment::merkle_root(&l);
        let claim = ImpressionsClaim {
            impressions: u.impressions,
            index: IMPRESSIONS_LEAF_INDEX,
            proof: merkle_proof(&l, IMPRESSIONS_LEAF_INDEX).unwrap(),
        };
        (root, claim)
    }

    #[test]
    fn valid_claim_passes() {
        let (root, claim) = claim_for(&update(4));
        assert!(verify_claim(&root, &claim).is_ok());
    }

    #[test]
    fn inflated_count_fails() {
        let (root, mut claim) = claim_for(&update(4));
        claim.impressions = U256::from(5);
        assert!(matches!(
            verify_claim(&root, &claim),
            Err(ChannelError::ProofRejected { .. })
        ));
    }

    #[test]
    fn wrong_slot_fails() {
        let u = update(4);
        let l = leaves(&u, &u.prev_root);
        let root = adchannel_commitment::merkle_root(&l);
        // the balance leaf proves nothing about the count
        let claim = ImpressionsClaim {
            impressions: u.balance,
            index: 4,
            proof: merkle_proof(&l, 4).unwrap(),
        };
        assert!(verify_claim(&root, &claim).is_err());
    }

    #[test]
    fn proof_for_other_root_fails() {
        let (_, claim) = claim_for(&update(4));
        let (other, _) = claim_for(&update(5));
        assert!(verify_claim(&other, &claim).is_err());
    }
}
