//! Channel and update model.
//!
//! A `Channel` is one party's local view of a bilateral channel: the
//! identity fields the contract knows about, the accounting head (last
//! applied impression, count, balance, root chain) and the reconciliation
//! queues. An `Update` is one impression folded into that accounting.
//!
//! ## Lifecycle
//!
//! ```text
//!   ┌──────┐ proposeCheckpoint ┌────────────────────┐
//!   │ OPEN ├──────────────────▶│ CHECKPOINT_PENDING │
//!   └──▲───┘                   └─────────┬──────────┘
//!      │ checkpoint (renew)              │ checkpoint (close)
//!      └─────────────────────────────────┤
//!                                        ▼
//!                                   ┌────────┐
//!                                   │ CLOSED │
//!                                   └────────┘
//! ```

use std::{
    collections::{BTreeMap, VecDeque},
    fmt,
};

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::{
    Address, Attestation, ChannelError, ChannelId, Impression, ImpressionId, Root, Signature,
    constants::RECENT_IMPRESSIONS_WINDOW,
};

/// What a pending checkpoint does once committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckpointKind {
    /// Commit the root and extend the channel's expiration.
    Renew,
    /// Commit the root and close the channel for settlement.
    Close,
}

impl CheckpointKind {
    #[must_use]
    pub fn from_renew(renew: bool) -> Self {
        if renew { Self::Renew } else { Self::Close }
    }

    #[must_use]
    pub fn is_renew(self) -> bool {
        self == Self::Renew
    }
}

impl fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Renew => write!(f, "RENEW"),
            Self::Close => write!(f, "CLOSE"),
        }
    }
}

/// Channel lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelState {
    Open,
    CheckpointPending(CheckpointKind),
    Closed,
}

impl ChannelState {
    /// The contract's numeric encoding: 0 open, 1 renew pending,
    /// 2 close pending, 3 closed.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::CheckpointPending(CheckpointKind::Renew) => 1,
            Self::CheckpointPending(CheckpointKind::Close) => 2,
            Self::Closed => 3,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, ChannelError> {
        match code {
            0 => Ok(Self::Open),
            1 => Ok(Self::CheckpointPending(CheckpointKind::Renew)),
            2 => Ok(Self::CheckpointPending(CheckpointKind::Close)),
            3 => Ok(Self::Closed),
            other => Err(ChannelError::InvalidEncoding {
                reason: format!("unknown channel state code {other}"),
            }),
        }
    }

    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, Self::CheckpointPending(_))
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::CheckpointPending(kind) => write!(f, "CHECKPOINT_PENDING({kind})"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// The fields that pin a channel to one contract and one pair of parties.
///
/// Fingerprints are computed over these plus a root, so two states with the
/// same identity and root are the same signed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelIdentity {
    pub contract_id: Address,
    pub channel_id: ChannelId,
    pub demand: Address,
    pub supply: Address,
}

impl ChannelIdentity {
    /// The other party, or `None` if `party` is not in this channel.
    #[must_use]
    pub fn counterparty(&self, party: &Address) -> Option<Address> {
        if *party == self.demand {
            Some(self.supply)
        } else if *party == self.supply {
            Some(self.demand)
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_party(&self, address: &Address) -> bool {
        *address == self.demand || *address == self.supply
    }
}

/// The minimal input to fold one impression into a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub impression_id: ImpressionId,
    pub price: U256,
}

impl From<&Impression> for UpdateRequest {
    fn from(impression: &Impression) -> Self {
        Self {
            impression_id: impression.impression_id,
            price: impression.price,
        }
    }
}

impl From<&Update> for UpdateRequest {
    fn from(update: &Update) -> Self {
        Self {
            impression_id: update.impression_id,
            price: update.price,
        }
    }
}

/// One impression folded into the channel's accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub identity: ChannelIdentity,
    pub impression_id: ImpressionId,
    pub price: U256,
    /// Count after this update (previous count + 1).
    pub impressions: U256,
    /// Balance after this update (previous balance + price).
    pub balance: U256,
    /// Merkle root over this update's leaves, chained to `prev_root`.
    pub root: Root,
    pub prev_root: Root,
    /// Demand's signature over the fingerprint with `root`.
    pub signature: Option<Signature>,
}

/// One party's local view of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub identity: ChannelIdentity,
    /// Root of the latest applied update (zero when freshly opened).
    pub root: Root,
    pub state: ChannelState,
    /// Block height after which the channel may be closed unilaterally.
    pub expiration: u64,
    /// Block height the current checkpoint challenge window ends at (0 = none).
    pub challenge_timeout: u64,
    /// Root proposed on-chain, mirrored locally for comparison.
    pub proposed_root: Root,
    /// Head update fields.
    pub impression_id: ImpressionId,
    pub price: U256,
    pub impressions: U256,
    pub balance: U256,
    pub prev_root: Root,
    pub signature: Option<Signature>,
    /// Peer updates that do not yet extend the chain, ordered by count.
    pub pending_updates: Vec<Update>,
    /// Locally observed impressions still waiting for a signed update.
    pub pending_impressions: BTreeMap<ImpressionId, Impression>,
    /// Impressions the market attested to while we escalate with demand.
    pub attested: BTreeMap<ImpressionId, Attestation>,
    /// Ids of the most recently applied impressions, oldest first, capped
    /// at [`RECENT_IMPRESSIONS_WINDOW`](crate::constants::RECENT_IMPRESSIONS_WINDOW).
    #[serde(default)]
    pub recent_impressions: VecDeque<ImpressionId>,
}

impl Channel {
    /// A freshly opened channel: zero root, zero counters, empty queues.
    #[must_use]
    pub fn opened(identity: ChannelIdentity, expiration: u64) -> Self {
        Self {
            identity,
            root: Root::ZERO,
            state: ChannelState::Open,
            expiration,
            challenge_timeout: 0,
            proposed_root: Root::ZERO,
            impression_id: ImpressionId::NONE,
            price: U256::zero(),
            impressions: U256::zero(),
            balance: U256::zero(),
            prev_root: Root::ZERO,
            signature: None,
            pending_updates: Vec::new(),
            pending_impressions: BTreeMap::new(),
            attested: BTreeMap::new(),
            recent_impressions: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn channel_id(&self) -> ChannelId {
        self.identity.channel_id
    }

    /// The head of the chain expressed as an `Update`.
    #[must_use]
    pub fn head(&self) -> Update {
        Update {
            identity: self.identity,
            impression_id: self.impression_id,
            price: self.price,
            impressions: self.impressions,
            balance: self.balance,
            root: self.root,
            prev_root: self.prev_root,
            signature: self.signature,
        }
    }

    /// Whether `impression_id` was folded into the chain recently.
    #[must_use]
    pub fn recently_applied(&self, impression_id: &ImpressionId) -> bool {
        self.recent_impressions.contains(impression_id)
    }

    /// Remember an applied impression, forgetting the oldest past the cap.
    pub fn record_applied(&mut self, impression_id: ImpressionId) {
        if self.recent_impressions.len() >= RECENT_IMPRESSIONS_WINDOW {
            self.recent_impressions.pop_front();
        }
        self.recent_impressions.push_back(impression_id);
    }

    /// Whether the channel still accepts impressions and updates.
    #[must_use]
    pub fn accepts_updates(&self) -> bool {
        self.state != ChannelState::Closed
    }

    /// Whether this channel carries traffic between the given pair.
    #[must_use]
    pub fn connects(&self, demand: &Address, supply: &Address) -> bool {
        self.identity.demand == *demand && self.identity.supply == *supply
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl ChannelIdentity {
    /// Fixed identity for tests.
    #[must_use]
    pub fn dummy() -> Self {
        Self {
            contract_id: Address([0x12; 20]),
            channel_id: ChannelId(crate::Bytes32([0xc0; 32])),
            demand: Address([0x11; 20]),
            supply: Address([0x22; 20]),
        }
    }
}
