//! In-memory ledger contract with a block clock.
//!
//! Each mutating call is mined into its own block: the clock advances
//! first and the call executes at the new height. A call that fails still
//! consumes its block, like a reverted transaction. Queries are free.
//!
//! ## Checkpoint windows
//!
//! A proposal, challenge or accepted challenge executed at block `b` sets
//! `challenge_timeout = b + challenge_period`. Accepting a challenge swaps
//! in the proposer's higher root and leaves the checkpoint pending. Challenges and accepts land
//! while `block <= challenge_timeout`; the checkpoint commits once
//! `block > challenge_timeout`.

use std::collections::BTreeMap;

use adchannel_commitment::{LeafValue, fingerprint, hash_leaf, recover};
use adchannel_types::{
    Address, ChallengeRecord, ChannelError, ChannelId, ChannelIdentity, ChannelRecord,
    ChannelState, CheckpointKind, ContractEvent, ImpressionsClaim, ProtocolConfig, Result, Root,
    SignedRoot, U256,
};
use tracing::{debug, info, warn};

use crate::contract::{LedgerContract, verify_claim};

/// Who proposed the pending checkpoint and what count they proved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Proposal {
    proposer: Address,
    impressions: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Demand,
    Supply,
}

/// A ledger contract held in memory.
#[derive(Debug)]
pub struct ContractMirror {
    address: Address,
    owner: Address,
    protocol: ProtocolConfig,
    /// Height of the latest mined block.
    head: u64,
    channel_count: u64,
    demand: BTreeMap<Address, String>,
    supply: BTreeMap<Address, String>,
    channels: BTreeMap<ChannelId, ChannelRecord>,
    proposals: BTreeMap<ChannelId, Proposal>,
    challenges: BTreeMap<ChannelId, ChallengeRecord>,
    events: Vec<ContractEvent>,
}

impl ContractMirror {
    /// A fresh contract at `address`, administered by `owner`.
    #[must_use]
    pub fn new(address: Address, owner: Address, protocol: ProtocolConfig) -> Self {
        info!(
            contract = %address,
            challenge_period = protocol.challenge_period,
            channel_timeout = protocol.channel_timeout,
            "Contract deployed"
        );
        Self {
            address,
            owner,
            protocol,
            head: 0,
            channel_count: 0,
            demand: BTreeMap::new(),
            supply: BTreeMap::new(),
            channels: BTreeMap::new(),
            proposals: BTreeMap::new(),
            challenges: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    #[must_use]
    pub fn protocol(&self) -> &ProtocolConfig {
        &self.protocol
    }

    /// Mine `n` empty blocks.
    pub fn mine_blocks(&mut self, n: u64) {
        self.head = self.head.saturating_add(n);
        debug!(block = self.head, mined = n, "Mined blocks");
    }

    /// Emitted events not yet drained.
    #[must_use]
    pub fn events(&self) -> &[ContractEvent] {
        &self.events
    }

    /// Take every emitted event, oldest first.
    pub fn drain_events(&mut self) -> Vec<ContractEvent> {
        std::mem::take(&mut self.events)
    }

    /// Mine one block and run `call` in it.
    fn execute<T>(
        &mut self,
        name: &'static str,
        caller: Address,
        call: impl FnOnce(&mut Self, u64) -> Result<T>,
    ) -> Result<T> {
        self.head = self.head.saturating_add(1);
        let block = self.head;
        let result = call(self, block);
        match &result {
            Ok(_) => debug!(call = name, caller = %caller, block, "Contract call executed"),
            Err(e) => warn!(call = name, caller = %caller, block, error = %e, "Contract call reverted"),
        }
        result
    }

    fn record(&self, channel_id: &ChannelId) -> Result<ChannelRecord> {
        self.channels
            .get(channel_id)
            .cloned()
            .ok_or(ChannelError::UnknownChannel(*channel_id))
    }

    fn registry(&self, side: Side) -> &BTreeMap<Address, String> {
        match side {
            Side::Demand => &self.demand,
            Side::Supply => &self.supply,
        }
    }

    fn registry_mut(&mut self, side: Side) -> &mut BTreeMap<Address, String> {
        match side {
            Side::Demand => &mut self.demand,
            Side::Supply => &mut self.supply,
        }
    }

    fn only_owner(&self, caller: Address) -> Result<()> {
        if caller == self.owner {
            Ok(())
        } else {
            Err(ChannelError::ContractRejected {
                reason: format!("{caller} is not the contract owner"),
            })
        }
    }

    fn register(&mut self, side: Side, caller: Address, address: Address, url: &str) -> Result<()> {
        self.only_owner(caller)?;
        self.registry_mut(side).insert(address, url.to_string());
        let url = url.to_string();
        self.events.push(match side {
            Side::Demand => ContractEvent::DemandRegistered { address, url },
            Side::Supply => ContractEvent::SupplyRegistered { address, url },
        });
        info!(?side, party = %address, "Party registered");
        Ok(())
    }

    fn deregister(&mut self, side: Side, caller: Address, address: Address) -> Result<()> {
        self.only_owner(caller)?;
        if self.registry_mut(side).remove(&address).is_none() {
            return Err(ChannelError::NotRegistered(address));
        }
        self.events.push(match side {
            Side::Demand => ContractEvent::DemandDeregistered { address },
            Side::Supply => ContractEvent::SupplyDeregistered { address },
        });
        info!(?side, party = %address, "Party deregistered");
        Ok(())
    }

    fn update_url(&mut self, side: Side, caller: Address, url: &str) -> Result<()> {
        let entry = self
            .registry_mut(side)
            .get_mut(&caller)
            .ok_or(ChannelError::NotRegistered(caller))?;
        url.clone_into(entry);
        let url = url.to_string();
        self.events.push(match side {
            Side::Demand => ContractEvent::DemandUrlUpdated { address: caller, url },
            Side::Supply => ContractEvent::SupplyUrlUpdated { address: caller, url },
        });
        Ok(())
    }

    /// The count a challenge must beat: the proven proposal or the
    /// standing challenge, whichever is higher.
    fn standing_count(&self, channel_id: &ChannelId) -> U256 {
        let proposed = self
            .proposals
            .get(channel_id)
            .map_or(U256::zero(), |p| p.impressions);
        let challenged = self
            .challenges
            .get(channel_id)
            .map_or(U256::zero(), |c| c.impressions);
        proposed.max(challenged)
    }

    /// Commit `root` and finish the pending checkpoint.
    fn commit(&mut self, block: u64, channel_id: &ChannelId, root: Root, kind: CheckpointKind) -> Result<()> {
        let channel_timeout = self.protocol.channel_timeout;
        let record = self
            .channels
            .get_mut(channel_id)
            .ok_or(ChannelError::UnknownChannel(*channel_id))?;
        record.root = root;
        record.proposed_root = Root::ZERO;
        record.challenge_timeout = 0;
        if kind.is_renew() {
            record.state = ChannelState::Open;
            record.expiration = block.saturating_add(channel_timeout);
        } else {
            record.state = ChannelState::Closed;
        }
        let expiration = record.expiration;
        let state = record.state;
        self.proposals.remove(channel_id);
        self.challenges.remove(channel_id);
        self.events.push(ContractEvent::ChannelCheckpointed {
            channel_id: *channel_id,
            root,
            renew: kind.is_renew(),
            expiration,
        });
        info!(channel = %channel_id, root = %root, state = %state, expiration, "Checkpoint committed");
        Ok(())
    }

    fn open_at(&mut self, block: u64, caller: Address, supply: Address) -> Result<ChannelId> {
        if !self.demand.contains_key(&caller) {
            return Err(ChannelError::NotRegistered(caller));
        }
        if !self.supply.contains_key(&supply) {
            return Err(ChannelError::NotRegistered(supply));
        }
        let channel_id = ChannelId(hash_leaf(LeafValue::Number(U256::from(self.channel_count))));
        self.channel_count += 1;

        let record = ChannelRecord {
            identity: ChannelIdentity {
                contract_id: self.address,
                channel_id,
                demand: caller,
                supply,
            },
            root: Root::ZERO,
            state: ChannelState::Open,
            expiration: block.saturating_add(self.protocol.channel_timeout),
            challenge_timeout: 0,
            proposed_root: Root::ZERO,
        };
        info!(channel = %channel_id, demand = %caller, supply = %supply, expiration = record.expiration, "Channel opened");
        self.channels.insert(channel_id, record.clone());
        self.events.push(ContractEvent::ChannelOpened { record });
        Ok(channel_id)
    }

    fn propose_at(
        &mut self,
        block: u64,
        caller: Address,
        channel_id: &ChannelId,
        proposal: &SignedRoot,
        renew: bool,
        claim: Option<&ImpressionsClaim>,
    ) -> Result<()> {
        let record = self.record(channel_id)?;
        if record.state != ChannelState::Open {
            return Err(ChannelError::ChannelNotOpen {
                channel_id: *channel_id,
                state: record.state,
            });
        }
        if !record.identity.is_party(&caller) {
            return Err(ChannelError::NotAParty(caller));
        }
        let signer = recover(&fingerprint(&record.identity, &proposal.root), &proposal.signature);
        if !record.identity.is_party(&signer) {
            return Err(ChannelError::NotAParty(signer));
        }
        let impressions = match claim {
            Some(claim) => {
                verify_claim(&proposal.root, claim)?;
                claim.impressions
            }
            None => U256::zero(),
        };

        let kind = CheckpointKind::from_renew(renew);
        let challenge_timeout = block.saturating_add(self.protocol.challenge_period);
        if let Some(stored) = self.channels.get_mut(channel_id) {
            stored.state = ChannelState::CheckpointPending(kind);
            stored.proposed_root = proposal.root;
            stored.challenge_timeout = challenge_timeout;
        }
        self.proposals.insert(*channel_id, Proposal { proposer: caller, impressions });
        self.events.push(ContractEvent::CheckpointProposed {
            channel_id: *channel_id,
            root: proposal.root,
            renew,
            proposer: caller,
        });
        info!(
            channel = %channel_id,
            root = %proposal.root,
            %kind,
            impressions = %impressions,
            challenge_timeout,
            "Checkpoint proposed"
        );
        Ok(())
    }

    fn checkpoint_at(&mut self, block: u64, caller: Address, channel_id: &ChannelId) -> Result<()> {
        let record = self.record(channel_id)?;
        if !record.identity.is_party(&caller) {
            return Err(ChannelError::NotAParty(caller));
        }
        let ChannelState::CheckpointPending(kind) = record.state else {
            return Err(ChannelError::NoCheckpointPending(*channel_id));
        };
        if block <= record.challenge_timeout {
            return Err(ChannelError::ChallengePeriodActive {
                now: block,
                challenge_timeout: record.challenge_timeout,
            });
        }
        let root = self
            .challenges
            .get(channel_id)
            .map_or(record.proposed_root, |c| c.challenge_root);
        self.commit(block, channel_id, root, kind)
    }

    fn challenge_at(
        &mut self,
        block: u64,
        caller: Address,
        channel_id: &ChannelId,
        evidence: &SignedRoot,
        claim: &ImpressionsClaim,
    ) -> Result<()> {
        let record = self.record(channel_id)?;
        let counterparty = record
            .identity
            .counterparty(&caller)
            .ok_or(ChannelError::NotAParty(caller))?;
        if !record.state.is_pending() {
            return Err(ChannelError::NoCheckpointPending(*channel_id));
        }
        if block > record.challenge_timeout {
            return Err(ChannelError::ChallengeWindowClosed {
                now: block,
                challenge_timeout: record.challenge_timeout,
            });
        }
        let recovered = recover(&fingerprint(&record.identity, &evidence.root), &evidence.signature);
        if recovered != counterparty {
            return Err(ChannelError::SignatureMismatch {
                expected: counterparty,
                recovered,
            });
        }
        verify_claim(&evidence.root, claim)?;
        let current = self.standing_count(channel_id);
        if claim.impressions <= current {
            return Err(ChannelError::CountNotHigher {
                claimed: claim.impressions,
                current,
            });
        }

        let challenge_timeout = block.saturating_add(self.protocol.challenge_period);
        if let Some(stored) = self.channels.get_mut(channel_id) {
            stored.challenge_timeout = challenge_timeout;
        }
        self.challenges.insert(
            *channel_id,
            ChallengeRecord {
                channel_id: *channel_id,
                challenge_root: evidence.root,
                impressions: claim.impressions,
                challenger: caller,
            },
        );
        self.events.push(ContractEvent::CheckpointChallenged {
            channel_id: *channel_id,
            root: evidence.root,
            impressions: claim.impressions,
            challenger: caller,
        });
        info!(
            channel = %channel_id,
            root = %evidence.root,
            impressions = %claim.impressions,
            challenger = %caller,
            challenge_timeout,
            "Checkpoint challenged"
        );
        Ok(())
    }

    fn accept_at(
        &mut self,
        block: u64,
        caller: Address,
        channel_id: &ChannelId,
        claim: &ImpressionsClaim,
        superseding: Option<&SignedRoot>,
    ) -> Result<()> {
        let record = self.record(channel_id)?;
        let ChannelState::CheckpointPending(kind) = record.state else {
            return Err(ChannelError::NoCheckpointPending(*channel_id));
        };
        let challenged = self
            .challenges
            .get(channel_id)
            .map(|c| c.impressions)
            .ok_or(ChannelError::NoChallenge(*channel_id))?;
        if self.proposals.get(channel_id).map(|p| p.proposer) != Some(caller) {
            return Err(ChannelError::NotProposer(caller));
        }
        if block > record.challenge_timeout {
            return Err(ChannelError::ChallengeWindowClosed {
                now: block,
                challenge_timeout: record.challenge_timeout,
            });
        }

        let root = match superseding {
            Some(signed) => {
                let counterparty = record
                    .identity
                    .counterparty(&caller)
                    .ok_or(ChannelError::NotAParty(caller))?;
                let recovered = recover(&fingerprint(&record.identity, &signed.root), &signed.signature);
                if recovered != counterparty {
                    return Err(ChannelError::SignatureMismatch {
                        expected: counterparty,
                        recovered,
                    });
                }
                signed.root
            }
            None => record.proposed_root,
        };
        verify_claim(&root, claim)?;
        if claim.impressions <= challenged {
            return Err(ChannelError::CountNotHigher {
                claimed: claim.impressions,
                current: challenged,
            });
        }

        let challenge_timeout = block.saturating_add(self.protocol.challenge_period);
        if let Some(stored) = self.channels.get_mut(channel_id) {
            stored.proposed_root = root;
            stored.challenge_timeout = challenge_timeout;
        }
        self.proposals.insert(
            *channel_id,
            Proposal {
                proposer: caller,
                impressions: claim.impressions,
            },
        );
        self.challenges.remove(channel_id);
        self.events.push(ContractEvent::ChallengeAccepted {
            channel_id: *channel_id,
            root,
            impressions: claim.impressions,
            renew: kind.is_renew(),
        });
        info!(
            channel = %channel_id,
            root = %root,
            impressions = %claim.impressions,
            challenge_timeout,
            "Challenge answered"
        );
        Ok(())
    }
}

impl LedgerContract for ContractMirror {
    fn block_number(&self) -> u64 {
        self.head
    }

    fn register_demand(&mut self, caller: Address, demand: Address, url: &str) -> Result<()> {
        self.execute("registerDemand", caller, |c, _| c.register(Side::Demand, caller, demand, url))
    }

    fn register_supply(&mut self, caller: Address, supply: Address, url: &str) -> Result<()> {
        self.execute("registerSupply", caller, |c, _| c.register(Side::Supply, caller, supply, url))
    }

    fn deregister_demand(&mut self, caller: Address, demand: Address) -> Result<()> {
        self.execute("deregisterDemand", caller, |c, _| c.deregister(Side::Demand, caller, demand))
    }

    fn deregister_supply(&mut self, caller: Address, supply: Address) -> Result<()> {
        self.execute("deregisterSupply", caller, |c, _| c.deregister(Side::Supply, caller, supply))
    }

    fn update_demand_url(&mut self, caller: Address, url: &str) -> Result<()> {
        self.execute("updateDemandUrl", caller, |c, _| c.update_url(Side::Demand, caller, url))
    }

    fn update_supply_url(&mut self, caller: Address, url: &str) -> Result<()> {
        self.execute("updateSupplyUrl", caller, |c, _| c.update_url(Side::Supply, caller, url))
    }

    fn registered_demand(&self, demand: &Address) -> Option<&str> {
        self.registry(Side::Demand).get(demand).map(String::as_str)
    }

    fn registered_supply(&self, supply: &Address) -> Option<&str> {
        self.registry(Side::Supply).get(supply).map(String::as_str)
    }

    fn open_channel(&mut self, caller: Address, supply: Address) -> Result<ChannelId> {
        self.execute("openChannel", caller, |c, block| c.open_at(block, caller, supply))
    }

    fn propose_checkpoint(
        &mut self,
        caller: Address,
        channel_id: &ChannelId,
        proposal: &SignedRoot,
        renew: bool,
        claim: Option<&ImpressionsClaim>,
    ) -> Result<()> {
        self.execute("proposeCheckpoint", caller, |c, block| {
            c.propose_at(block, caller, channel_id, proposal, renew, claim)
        })
    }

    fn checkpoint_channel(&mut self, caller: Address, channel_id: &ChannelId) -> Result<()> {
        self.execute("checkpointChannel", caller, |c, block| c.checkpoint_at(block, caller, channel_id))
    }

    fn challenge_checkpoint(
        &mut self,
        caller: Address,
        channel_id: &ChannelId,
        evidence: &SignedRoot,
        claim: &ImpressionsClaim,
    ) -> Result<()> {
        self.execute("challengeCheckpoint", caller, |c, block| {
            c.challenge_at(block, caller, channel_id, evidence, claim)
        })
    }

    fn accept_challenge(
        &mut self,
        caller: Address,
        channel_id: &ChannelId,
        claim: &ImpressionsClaim,
        superseding: Option<&SignedRoot>,
    ) -> Result<()> {
        self.execute("acceptChallenge", caller, |c, block| {
            c.accept_at(block, caller, channel_id, claim, superseding)
        })
    }

    fn get_channel(&self, channel_id: &ChannelId) -> Result<ChannelRecord> {
        self.record(channel_id)
    }

    fn get_challenge(&self, channel_id: &ChannelId) -> Result<Option<ChallengeRecord>> {
        self.record(channel_id)?;
        Ok(self.challenges.get(channel_id).cloned())
    }
}
