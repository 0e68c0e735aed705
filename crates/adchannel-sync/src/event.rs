//! The closed event vocabulary every role runs through its reducer.
//!
//! Events are the unit of persistence: the store keeps them as JSON lines
//! and recovery feeds them back through the reducer in order.

use adchannel_types::{
    Attestation, ChannelId, ChannelRecord, ChannelUpdate, ContractEvent, Impression, ImpressionId,
    Root,
};
use serde::{Deserialize, Serialize};

/// Inputs to the channel reducer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelEvent {
    /// The contract opened a channel.
    ChannelOpened { record: ChannelRecord },
    /// The browser beacon reported an impression.
    ImpressionServed(Impression),
    /// Demand delivered a signed update for an impression.
    ChannelUpdate(ChannelUpdate),
    /// A checkpoint was proposed on-chain.
    CheckpointProposed { channel_id: ChannelId, root: Root, renew: bool },
    /// The contract committed a checkpoint.
    ChannelCheckpointed {
        channel_id: ChannelId,
        root: Root,
        renew: bool,
        expiration: u64,
    },
    /// The market returned attestations for escalated impressions.
    SignaturesReceived(Vec<Attestation>),
    /// The market has no record of these impressions.
    ImpressionNotFound { ids: Vec<ImpressionId> },
}

impl ChannelEvent {
    /// Short name for log lines.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChannelOpened { .. } => "CHANNEL_OPENED",
            Self::ImpressionServed(_) => "IMPRESSION_SERVED",
            Self::ChannelUpdate(_) => "CHANNEL_UPDATE",
            Self::CheckpointProposed { .. } => "CHECKPOINT_PROPOSED",
            Self::ChannelCheckpointed { .. } => "CHANNEL_CHECKPOINTED",
            Self::SignaturesReceived(_) => "SIGNATURES_RECEIVED",
            Self::ImpressionNotFound { .. } => "IMPRESSION_NOT_FOUND",
        }
    }

    /// The contract log entries a synchronizer reacts to.
    ///
    /// An accepted challenge replaces the proposed root, so it reads as a
    /// fresh proposal. Registry events and challenges map to `None`.
    #[must_use]
    pub fn from_contract(event: &ContractEvent) -> Option<Self> {
        match event {
            ContractEvent::ChannelOpened { record } => Some(Self::ChannelOpened {
                record: record.clone(),
            }),
            ContractEvent::CheckpointProposed {
                channel_id,
                root,
                renew,
                ..
            } => Some(Self::CheckpointProposed {
                channel_id: *channel_id,
                root: *root,
                renew: *renew,
            }),
            ContractEvent::ChallengeAccepted {
                channel_id,
                root,
                renew,
                ..
            } => Some(Self::CheckpointProposed {
                channel_id: *channel_id,
                root: *root,
                renew: *renew,
            }),
            ContractEvent::ChannelCheckpointed {
                channel_id,
                root,
                renew,
                expiration,
            } => Some(Self::ChannelCheckpointed {
                channel_id: *channel_id,
                root: *root,
                renew: *renew,
                expiration: *expiration,
            }),
            ContractEvent::DemandRegistered { .. }
            | ContractEvent::SupplyRegistered { .. }
            | ContractEvent::DemandDeregistered { .. }
            | ContractEvent::SupplyDeregistered { .. }
            | ContractEvent::DemandUrlUpdated { .. }
            | ContractEvent::SupplyUrlUpdated { .. }
            | ContractEvent::CheckpointChallenged { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use adchannel_types::{Address, Bytes32, ChannelIdentity};

    use super::*;

    #[test]
    fn event_json_is_tagged() {
        let event = ChannelEvent::ImpressionNotFound {
            ids: vec![ImpressionId(Bytes32([1; 32]))],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"IMPRESSION_NOT_FOUND\""), "{json}");
        let back: ChannelEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn served_roundtrip() {
        let event = ChannelEvent::ImpressionServed(Impression::dummy(4, 9));
        let json = serde_json::to_string(&event).unwrap();
        let back: ChannelEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.kind(), "IMPRESSION_SERVED");
    }

    #[test]
    fn contract_events_convert() {
        let id = ChannelIdentity::dummy();
        let proposed = ContractEvent::CheckpointProposed {
            channel_id: id.channel_id,
            root: Bytes32([2; 32]),
            renew: false,
            proposer: id.demand,
        };
        assert_eq!(
            ChannelEvent::from_contract(&proposed),
            Some(ChannelEvent::CheckpointProposed {
                channel_id: id.channel_id,
                root: Bytes32([2; 32]),
                renew: false,
            })
        );
        let registered = ContractEvent::SupplyRegistered {
            address: Address([1; 20]),
            url: "http://localhost:3001".into(),
        };
        assert_eq!(ChannelEvent::from_contract(&registered), None);
    }

    #[test]
    fn accepted_challenge_reads_as_new_proposal() {
        let id = ChannelIdentity::dummy();
        let accepted = ContractEvent::ChallengeAccepted {
            channel_id: id.channel_id,
            root: Bytes32([3; 32]),
            impressions: adchannel_types::U256::from(3),
            renew: true,
        };
        assert_eq!(
            ChannelEvent::from_contract(&accepted),
            Some(ChannelEvent::CheckpointProposed {
                channel_id: id.channel_id,
                root: Bytes32([3; 32]),
                renew: true,
            })
        );
    }
}
