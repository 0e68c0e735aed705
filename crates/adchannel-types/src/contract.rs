//! Shapes exchanged with the ledger contract.
//!
//! These mirror the contract's storage and call arguments exactly: 20-byte
//! addresses, 32-byte roots and ids, ledger-native integers for counts and
//! block heights.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::{Address, Bytes32, Channel, ChannelId, ChannelIdentity, ChannelState, Root, Signature};

/// The contract's stored view of a channel (`getChannel`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub identity: ChannelIdentity,
    pub root: Root,
    pub state: ChannelState,
    pub expiration: u64,
    pub challenge_timeout: u64,
    pub proposed_root: Root,
}

impl ChannelRecord {
    /// Local channel initialised from the on-chain record.
    #[must_use]
    pub fn to_channel(&self) -> Channel {
        let mut channel = Channel::opened(self.identity, self.expiration);
        channel.root = self.root;
        channel.state = self.state;
        channel.challenge_timeout = self.challenge_timeout;
        channel.proposed_root = self.proposed_root;
        channel
    }
}

/// An open challenge against a pending checkpoint (`getChallenge`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRecord {
    pub channel_id: ChannelId,
    pub challenge_root: Root,
    pub impressions: U256,
    pub challenger: Address,
}

/// Merkle evidence that a root commits to a given impression count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpressionsClaim {
    pub impressions: U256,
    /// 1-based leaf position; the impression count lives at a fixed slot.
    pub index: u64,
    /// Ordered sibling hashes from the leaf up to the root.
    pub proof: Vec<Bytes32>,
}

/// A root together with a party's signature over its fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRoot {
    pub root: Root,
    pub signature: Signature,
}

/// Log entries emitted by the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractEvent {
    DemandRegistered { address: Address, url: String },
    SupplyRegistered { address: Address, url: String },
    DemandDeregistered { address: Address },
    SupplyDeregistered { address: Address },
    DemandUrlUpdated { address: Address, url: String },
    SupplyUrlUpdated { address: Address, url: String },
    ChannelOpened { record: ChannelRecord },
    CheckpointProposed { channel_id: ChannelId, root: Root, renew: bool, proposer: Address },
    CheckpointChallenged { channel_id: ChannelId, root: Root, impressions: U256, challenger: Address },
    ChallengeAccepted { channel_id: ChannelId, root: Root, impressions: U256, renew: bool },
    ChannelCheckpointed { channel_id: ChannelId, root: Root, renew: bool, expiration: u64 },
}
