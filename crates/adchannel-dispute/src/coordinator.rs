//! One party's side of the checkpoint dispute game.
//!
//! The coordinator remembers every channel head it has seen, keyed by
//! root, together with the leaves needed to prove its impression count and
//! whatever signature came with it. From that history it builds proposals,
//! decides how to react to the other side's proposal, and answers
//! challenges.
//!
//! Evidence against the counterparty must carry the counterparty's own
//! signature; heads signed only by this party are good for proposals but
//! never for challenges.

use std::collections::BTreeMap;

use adchannel_commitment::{
    Keypair, fingerprint, leaves, merkle_proof, merkle_root, recover, verify_signature,
};
use adchannel_types::{
    Address, Bytes32, ChallengeRecord, ChannelError, ChannelIdentity, ChannelRecord,
    ImpressionsClaim, Result, Root, Signature, SignedRoot, U256, Update,
    constants::{IMPRESSIONS_LEAF_INDEX, LEAF_COUNT},
};
use tracing::{debug, info, warn};

use crate::contract::LedgerContract;

/// A channel head as remembered for dispute purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootEntry {
    pub leaves: [Bytes32; LEAF_COUNT],
    pub impressions: U256,
    pub signature: Option<Signature>,
}

/// A signed root plus the proof of its impression count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evidence {
    pub signed: SignedRoot,
    pub claim: ImpressionsClaim,
}

/// How to react to a proposal on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisputeAction {
    /// The proposal covers everything this party has seen.
    Agree,
    /// A longer, provable history exists; submit it.
    Challenge(Evidence),
    /// The proposal is short, but nothing signed by the counterparty proves it.
    Concede,
}

/// What became of a call submitted to the contract.
#[derive(Debug)]
pub enum DisputeOutcome {
    Submitted,
    Rejected(ChannelError),
    /// The challenge window is still open; try again at this block.
    RetryAt(u64),
}

impl DisputeOutcome {
    fn from_call(call: &'static str, result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::Submitted,
            Err(ChannelError::ChallengePeriodActive { challenge_timeout, .. }) => {
                let at = challenge_timeout.saturating_add(1);
                debug!(call, retry_at = at, "Challenge window still open");
                Self::RetryAt(at)
            }
            Err(e) => {
                warn!(call, error = %e, "Contract rejected call");
                Self::Rejected(e)
            }
        }
    }

    #[must_use]
    pub fn is_submitted(&self) -> bool {
        matches!(self, Self::Submitted)
    }
}

/// Dispute state for one party of one channel.
#[derive(Debug)]
pub struct DisputeCoordinator {
    key: Keypair,
    identity: ChannelIdentity,
    counterparty: Address,
    history: BTreeMap<Root, RootEntry>,
}

impl DisputeCoordinator {
    /// A coordinator acting for `key` on the channel `identity`.
    ///
    /// # Errors
    /// `NotAParty` if `key` is neither demand nor supply.
    pub fn new(key: Keypair, identity: ChannelIdentity) -> Result<Self> {
        let me = key.address();
        let counterparty = identity.counterparty(&me).ok_or(ChannelError::NotAParty(me))?;
        Ok(Self {
            key,
            identity,
            counterparty,
            history: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn identity(&self) -> &ChannelIdentity {
        &self.identity
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.key.address()
    }

    #[must_use]
    pub fn entry(&self, root: &Root) -> Option<&RootEntry> {
        self.history.get(root)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Remember a channel head.
    ///
    /// Only signatures that recover to a channel party are kept. A head seen
    /// again keeps its signature, except that a counterparty signature
    /// replaces one made by this party.
    ///
    /// # Errors
    /// - `InvalidUpdate` if the update belongs to another channel
    /// - `HashChainBroken` if its root is not the root of its own leaves
    pub fn observe(&mut self, update: &Update) -> Result<()> {
        if update.identity != self.identity {
            return Err(ChannelError::InvalidUpdate {
                reason: format!("update addressed to {}", update.identity.channel_id),
            });
        }
        let leaves = leaves(update, &update.prev_root);
        if merkle_root(&leaves) != update.root {
            return Err(ChannelError::HashChainBroken {
                impressions: update.impressions,
            });
        }
        let digest = fingerprint(&self.identity, &update.root);
        let signed = update.signature.map(|sig| (sig, recover(&digest, &sig)));
        let entry = self.history.entry(update.root).or_insert(RootEntry {
            leaves,
            impressions: update.impressions,
            signature: None,
        });
        match signed {
            Some((_, signer)) if !self.identity.is_party(&signer) => {
                warn!(channel = %self.identity.channel_id, root = %update.root, signer = %signer, "Ignoring signature from outside the channel");
            }
            Some((sig, signer)) => {
                let held_by_counterparty = entry
                    .signature
                    .is_some_and(|held| recover(&digest, &held) == self.counterparty);
                if entry.signature.is_none() || (signer == self.counterparty && !held_by_counterparty) {
                    entry.signature = Some(sig);
                }
            }
            None => {}
        }
        debug!(channel = %self.identity.channel_id, root = %update.root, impressions = %update.impressions, "Observed head");
        Ok(())
    }

    /// Proof of the impression count committed by a remembered root.
    ///
    /// # Errors
    /// `ProofRejected` if the root was never observed.
    pub fn claim(&self, root: &Root) -> Result<ImpressionsClaim> {
        let entry = self.entry(root).ok_or_else(|| ChannelError::ProofRejected {
            reason: format!("root {root} not in history"),
        })?;
        Ok(ImpressionsClaim {
            impressions: entry.impressions,
            index: IMPRESSIONS_LEAF_INDEX,
            proof: merkle_proof(&entry.leaves, IMPRESSIONS_LEAF_INDEX)?,
        })
    }

    /// The remembered head with the highest count.
    fn latest(&self) -> Option<(&Root, &RootEntry)> {
        self.history.iter().max_by_key(|(_, e)| e.impressions)
    }

    /// The highest-count head that carries the counterparty's signature.
    #[must_use]
    pub fn best_evidence(&self) -> Option<Evidence> {
        let (root, entry) = self
            .history
            .iter()
            .filter(|(root, e)| {
                e.signature
                    .is_some_and(|sig| verify_signature(&self.identity, root, &sig, &self.counterparty))
            })
            .max_by_key(|(_, e)| e.impressions)?;
        let signature = entry.signature?;
        let claim = self.claim(root).ok()?;
        Some(Evidence {
            signed: SignedRoot { root: *root, signature },
            claim,
        })
    }

    /// Propose the latest remembered head, signed by this party.
    ///
    /// # Errors
    /// `InvalidUpdate` if nothing has been observed yet.
    pub fn propose_checkpoint<C: LedgerContract>(&self, contract: &mut C, renew: bool) -> Result<DisputeOutcome> {
        let (root, entry) = self.latest().ok_or_else(|| ChannelError::InvalidUpdate {
            reason: "no observed state to checkpoint".into(),
        })?;
        let proposal = SignedRoot {
            root: *root,
            signature: self.key.sign_state(&self.identity, root),
        };
        let claim = self.claim(root)?;
        info!(channel = %self.identity.channel_id, root = %root, impressions = %entry.impressions, renew, "Proposing checkpoint");
        Ok(DisputeOutcome::from_call(
            "proposeCheckpoint",
            contract.propose_checkpoint(self.address(), &self.identity.channel_id, &proposal, renew, Some(&claim)),
        ))
    }

    /// Decide how to react to the pending proposal in `record`.
    #[must_use]
    pub fn review_proposal(&self, record: &ChannelRecord, challenge: Option<&ChallengeRecord>) -> DisputeAction {
        let ours = self.latest().map_or(U256::zero(), |(_, e)| e.impressions);
        let proposed = self.entry(&record.proposed_root).map(|e| e.impressions);
        if ours.is_zero() || proposed.is_some_and(|n| n >= ours) {
            return DisputeAction::Agree;
        }

        let standing = proposed
            .unwrap_or_default()
            .max(challenge.map_or(U256::zero(), |c| c.impressions));
        match self.best_evidence() {
            Some(evidence) if evidence.claim.impressions > standing => {
                info!(
                    channel = %self.identity.channel_id,
                    proposed = %record.proposed_root,
                    ours = %evidence.claim.impressions,
                    "Proposal is behind local history"
                );
                DisputeAction::Challenge(evidence)
            }
            _ => {
                warn!(
                    channel = %self.identity.channel_id,
                    proposed = %record.proposed_root,
                    ours = %ours,
                    "Proposal is behind but no counterparty-signed head proves it"
                );
                DisputeAction::Concede
            }
        }
    }

    /// Submit challenge evidence.
    pub fn challenge<C: LedgerContract>(&self, contract: &mut C, evidence: &Evidence) -> DisputeOutcome {
        DisputeOutcome::from_call(
            "challengeCheckpoint",
            contract.challenge_checkpoint(
                self.address(),
                &self.identity.channel_id,
                &evidence.signed,
                &evidence.claim,
            ),
        )
    }

    /// Answer a challenge to this party's proposal.
    ///
    /// Proves more impressions under the proposed root when it has them,
    /// otherwise supersedes it with the best counterparty-signed head.
    ///
    /// # Errors
    /// `CountNotHigher` if nothing in the history beats the challenge.
    pub fn respond_to_challenge<C: LedgerContract>(
        &self,
        contract: &mut C,
        record: &ChannelRecord,
        challenge: &ChallengeRecord,
    ) -> Result<DisputeOutcome> {
        let channel_id = &self.identity.channel_id;
        if self
            .entry(&record.proposed_root)
            .is_some_and(|e| e.impressions > challenge.impressions)
        {
            let claim = self.claim(&record.proposed_root)?;
            return Ok(DisputeOutcome::from_call(
                "acceptChallenge",
                contract.accept_challenge(self.address(), channel_id, &claim, None),
            ));
        }
        match self.best_evidence() {
            Some(evidence) if evidence.claim.impressions > challenge.impressions => Ok(DisputeOutcome::from_call(
                "acceptChallenge",
                contract.accept_challenge(self.address(), channel_id, &evidence.claim, Some(&evidence.signed)),
            )),
            _ => Err(ChannelError::CountNotHigher {
                claimed: self.latest().map_or(U256::zero(), |(_, e)| e.impressions),
                current: challenge.impressions,
            }),
        }
    }

    /// Try to commit the pending checkpoint.
    pub fn checkpoint<C: LedgerContract>(&self, contract: &mut C) -> DisputeOutcome {
        DisputeOutcome::from_call(
            "checkpointChannel",
            contract.checkpoint_channel(self.address(), &self.identity.channel_id),
        )
    }
}

#[cfg(test)]
mod tests {
    use adchannel_commitment::fixtures::Parties;
    use adchannel_types::{Channel, ChannelState, CheckpointKind, ImpressionId, UpdateRequest};

    use super::*;

    /// Demand-signed heads 1..=n over the fixture channel.
    fn heads(p: &Parties, n: u8) -> Vec<Update> {
        let mut channel: Channel = p.channel();
        let mut out = Vec::new();
        for i in 1..=n {
            let request = UpdateRequest {
                impression_id: ImpressionId(Bytes32([i; 32])),
                price: U256::from(2),
            };
            channel = adchannel_ledger::make_update(&channel, request, Some(&p.demand)).unwrap();
            out.push(channel.head());
        }
        out
    }

    fn record(p: &Parties, proposed: Root) -> ChannelRecord {
        ChannelRecord {
            identity: p.identity(),
            root: Root::ZERO,
            state: ChannelState::CheckpointPending(CheckpointKind::Renew),
            expiration: 100,
            challenge_timeout: 10,
            proposed_root: proposed,
        }
    }

    #[test]
    fn outsiders_cannot_coordinate() {
        let p = Parties::new();
        assert!(matches!(
            DisputeCoordinator::new(p.market.clone(), p.identity()),
            Err(ChannelError::NotAParty(_))
        ));
    }

    #[test]
    fn observe_rejects_tampered_root() {
        let p = Parties::new();
        let mut c = DisputeCoordinator::new(p.supply.clone(), p.identity()).unwrap();
        let mut head = heads(&p, 1).remove(0);
        head.balance = U256::from(99);
        assert!(matches!(c.observe(&head), Err(ChannelError::HashChainBroken { .. })));
        assert!(c.is_empty());
    }

    #[test]
    fn claims_verify_against_observed_roots() {
        let p = Parties::new();
        let mut c = DisputeCoordinator::new(p.supply.clone(), p.identity()).unwrap();
        for h in heads(&p, 3) {
            c.observe(&h).unwrap();
        }
        let evidence = c.best_evidence().unwrap();
        assert_eq!(evidence.claim.impressions, U256::from(3));
        assert!(crate::verify_claim(&evidence.signed.root, &evidence.claim).is_ok());
    }

    #[test]
    fn own_signatures_are_not_evidence() {
        let p = Parties::new();
        let mut c = DisputeCoordinator::new(p.demand.clone(), p.identity()).unwrap();
        for h in heads(&p, 2) {
            c.observe(&h).unwrap();
        }
        assert_eq!(c.len(), 2);
        assert!(c.best_evidence().is_none());
    }

    #[test]
    fn counterparty_signature_replaces_own() {
        let p = Parties::new();
        let mut c = DisputeCoordinator::new(p.supply.clone(), p.identity()).unwrap();
        let head = heads(&p, 1).remove(0);
        let mut own = head.clone();
        own.signature = Some(p.supply.sign_state(&head.identity, &head.root));

        c.observe(&own).unwrap();
        assert!(c.best_evidence().is_none());
        c.observe(&head).unwrap();
        assert_eq!(c.best_evidence().unwrap().signed.signature, head.signature.unwrap());

        // and is not displaced again
        c.observe(&own).unwrap();
        assert_eq!(c.entry(&head.root).unwrap().signature, head.signature);
    }

    #[test]
    fn outsider_signature_is_dropped() {
        let p = Parties::new();
        let mut c = DisputeCoordinator::new(p.supply.clone(), p.identity()).unwrap();
        let head = heads(&p, 1).remove(0);
        let mut junk = head.clone();
        junk.signature = Some(p.market.sign_state(&head.identity, &head.root));

        c.observe(&junk).unwrap();
        assert_eq!(c.entry(&head.root).unwrap().signature, None);
        c.observe(&head).unwrap();
        assert!(c.best_evidence().is_some());
    }

    #[test]
    fn review_agrees_with_current_proposal() {
        let p = Parties::new();
        let mut c = DisputeCoordinator::new(p.supply.clone(), p.identity()).unwrap();
        let hs = heads(&p, 3);
        for h in &hs {
            c.observe(h).unwrap();
        }
        assert_eq!(c.review_proposal(&record(&p, hs[2].root), None), DisputeAction::Agree);
    }

    #[test]
    fn review_challenges_stale_proposal() {
        let p = Parties::new();
        let mut c = DisputeCoordinator::new(p.supply.clone(), p.identity()).unwrap();
        let hs = heads(&p, 3);
        for h in &hs {
            c.observe(h).unwrap();
        }
        match c.review_proposal(&record(&p, hs[0].root), None) {
            DisputeAction::Challenge(e) => {
                assert_eq!(e.signed.root, hs[2].root);
                assert_eq!(e.claim.impressions, U256::from(3));
            }
            other => panic!("expected challenge, got {other:?}"),
        }
    }

    #[test]
    fn review_concedes_without_evidence() {
        let p = Parties::new();
        let mut c = DisputeCoordinator::new(p.demand.clone(), p.identity()).unwrap();
        let hs = heads(&p, 3);
        for h in &hs {
            c.observe(h).unwrap();
        }
        assert_eq!(c.review_proposal(&record(&p, hs[0].root), None), DisputeAction::Concede);
    }

    #[test]
    fn review_concedes_when_challenge_already_higher() {
        let p = Parties::new();
        let mut c = DisputeCoordinator::new(p.supply.clone(), p.identity()).unwrap();
        let hs = heads(&p, 2);
        for h in &hs {
            c.observe(h).unwrap();
        }
        let standing = ChallengeRecord {
            channel_id: p.identity().channel_id,
            challenge_root: Bytes32([1; 32]),
            impressions: U256::from(5),
            challenger: p.supply.address(),
        };
        assert_eq!(
            c.review_proposal(&record(&p, hs[0].root), Some(&standing)),
            DisputeAction::Concede
        );
    }

    #[test]
    fn retry_block_follows_window() {
        let outcome = DisputeOutcome::from_call(
            "checkpointChannel",
            Err(ChannelError::ChallengePeriodActive { now: 5, challenge_timeout: 12 }),
        );
        assert!(matches!(outcome, DisputeOutcome::RetryAt(13)));
        assert!(DisputeOutcome::from_call("x", Ok(())).is_submitted());
    }
}
