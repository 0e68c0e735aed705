//! The per-role channel reducer: `(state, event) → (state, effects)`.
//!
//! Every role runs the same events. What differs is trust: demand
//! originates and signs updates, supply waits for them and escalates when
//! they do not arrive, the market only observes and verifies.
//!
//! The reducer never performs I/O. Delivery, persistence and timers are
//! described as [`Effect`]s for the synchronizer to carry out, which is
//! what lets recovery replay a persisted log into the identical state.

use std::collections::BTreeMap;

use adchannel_commitment::{Keypair, recover_attestation};
use adchannel_ledger::{Reception, clear_impression, make_update, park_impression, receive};
use adchannel_types::{
    Address, Attestation, Channel, ChannelError, ChannelId, ChannelState, ChannelUpdate,
    CheckpointKind, Impression, ImpressionId, Result, Role, Root, U256, UpdateRequest,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::event::ChannelEvent;

/// Everything one role knows about its channels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub channels: BTreeMap<ChannelId, Channel>,
}

impl SyncState {
    #[must_use]
    pub fn channel(&self, id: &ChannelId) -> Option<&Channel> {
        self.channels.get(id)
    }

    /// The open-or-pending channel between a demand and supply pair.
    #[must_use]
    pub fn find_by_parties(&self, demand: &Address, supply: &Address) -> Option<&Channel> {
        self.channels
            .values()
            .find(|c| c.connects(demand, supply) && c.accepts_updates())
    }

    /// The channel holding `impression_id` in its pending set.
    fn holding(&self, impression_id: &ImpressionId) -> Option<ChannelId> {
        self.channels
            .values()
            .find(|c| c.pending_impressions.contains_key(impression_id))
            .map(Channel::channel_id)
    }
}

/// Work the reducer asks collaborators to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Send a signed update to supply and the market.
    Deliver(ChannelUpdate),
    /// Start waiting for demand's update to this impression.
    ScheduleEscalation {
        channel_id: ChannelId,
        impression_id: ImpressionId,
    },
    /// Stop waiting; the impression was resolved.
    CancelEscalation { impression_id: ImpressionId },
    /// Ask demand for the update the market attested to.
    RequestUpdate {
        channel_id: ChannelId,
        attestation: Attestation,
    },
    /// An on-chain proposal differs from the local head.
    ProposalDisputed {
        channel_id: ChannelId,
        proposed: Root,
        local: Root,
        local_impressions: U256,
    },
}

/// Result of reducing one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub state: SyncState,
    pub effects: Vec<Effect>,
}

/// Per-role inputs the reducer needs but does not own.
#[derive(Debug, Clone, Copy)]
pub struct ReducerContext<'a> {
    pub role: Role,
    /// Demand's signing key.
    pub signer: Option<&'a Keypair>,
    /// The market whose attestations supply trusts.
    pub market: Option<Address>,
}

fn channel_mut<'s>(state: &'s mut SyncState, id: &ChannelId) -> Result<&'s mut Channel> {
    state
        .channels
        .get_mut(id)
        .ok_or(ChannelError::UnknownChannel(*id))
}

fn ensure_open(channel: &Channel) -> Result<()> {
    if channel.accepts_updates() {
        Ok(())
    } else {
        Err(ChannelError::ChannelNotOpen {
            channel_id: channel.channel_id(),
            state: channel.state,
        })
    }
}

/// Apply one event. On error the caller keeps the old state.
///
/// # Errors
/// Any validation, sequence or signature error raised while applying the
/// event; the event is then rejected as a whole.
pub fn reduce(ctx: &ReducerContext<'_>, state: &SyncState, event: &ChannelEvent) -> Result<Step> {
    let mut next = state.clone();
    let mut effects = Vec::new();

    match event {
        ChannelEvent::ChannelOpened { record } => {
            let id = record.identity.channel_id;
            if next.channels.contains_key(&id) {
                return Err(ChannelError::ChannelAlreadyOpen(id));
            }
            info!(role = %ctx.role, channel = %id, expiration = record.expiration, "Channel opened");
            next.channels.insert(id, record.to_channel());
        }

        ChannelEvent::ImpressionServed(impression) => {
            served(ctx, &mut next, impression, &mut effects)?;
        }

        ChannelEvent::ChannelUpdate(message) => {
            let id = message.channel_id();
            let channel = channel_mut(&mut next, &id)?;
            ensure_open(channel)?;
            if message.impression.impression_id != message.update.impression_id {
                return Err(ChannelError::InvalidUpdate {
                    reason: format!(
                        "envelope names impression {} but the update folds {}",
                        message.impression.impression_id, message.update.impression_id
                    ),
                });
            }
            let impression_id = message.update.impression_id;
            if clear_impression(channel, &impression_id).is_some() && ctx.role == Role::Supply {
                effects.push(Effect::CancelEscalation { impression_id });
            }
            let (updated, reception) = receive(channel, message.update.clone())?;
            match reception {
                Reception::Applied { count } => debug!(
                    channel = %id,
                    applied = count,
                    impressions = %updated.impressions,
                    "Applied channel update"
                ),
                Reception::Parked | Reception::Duplicate => {}
            }
            *channel = updated;
        }

        ChannelEvent::CheckpointProposed { channel_id, root, renew } => {
            let channel = channel_mut(&mut next, channel_id)?;
            ensure_open(channel)?;
            channel.state = ChannelState::CheckpointPending(CheckpointKind::from_renew(*renew));
            channel.proposed_root = *root;
            info!(channel = %channel_id, root = %root, renew, "Checkpoint proposed");
            if *root != channel.root {
                warn!(
                    channel = %channel_id,
                    proposed = %root,
                    local = %channel.root,
                    "Proposed root differs from local head"
                );
                effects.push(Effect::ProposalDisputed {
                    channel_id: *channel_id,
                    proposed: *root,
                    local: channel.root,
                    local_impressions: channel.impressions,
                });
            }
        }

        ChannelEvent::ChannelCheckpointed { channel_id, root, renew, expiration } => {
            let channel = channel_mut(&mut next, channel_id)?;
            channel.proposed_root = Root::ZERO;
            channel.challenge_timeout = 0;
            if *renew {
                channel.state = ChannelState::Open;
                channel.expiration = *expiration;
            } else {
                channel.state = ChannelState::Closed;
            }
            info!(channel = %channel_id, root = %root, state = %channel.state, "Channel checkpointed");
        }

        ChannelEvent::SignaturesReceived(attestations) => {
            let market = ctx.market.ok_or_else(|| {
                ChannelError::Configuration("no market address to verify attestations".into())
            })?;
            for attestation in attestations {
                attested(&mut next, market, attestation, &mut effects);
            }
        }

        ChannelEvent::ImpressionNotFound { ids } => {
            for impression_id in ids {
                let Some(id) = next.holding(impression_id) else {
                    continue;
                };
                let channel = channel_mut(&mut next, &id)?;
                clear_impression(channel, impression_id);
                warn!(channel = %id, impression = %impression_id, "Market has no record of impression");
                effects.push(Effect::CancelEscalation {
                    impression_id: *impression_id,
                });
            }
        }
    }

    Ok(Step { state: next, effects })
}

fn served(
    ctx: &ReducerContext<'_>,
    state: &mut SyncState,
    impression: &Impression,
    effects: &mut Vec<Effect>,
) -> Result<()> {
    let id = state
        .find_by_parties(&impression.demand_id, &impression.supply_id)
        .map(Channel::channel_id)
        .ok_or(ChannelError::NoChannelBetween {
            demand: impression.demand_id,
            supply: impression.supply_id,
        })?;
    let channel = channel_mut(state, &id)?;
    let covered = channel.recently_applied(&impression.impression_id)
        || channel
            .pending_updates
            .iter()
            .any(|u| u.impression_id == impression.impression_id);
    if covered {
        debug!(channel = %id, impression = %impression.impression_id, "Impression already covered");
        return Ok(());
    }

    match ctx.role {
        Role::Demand => {
            let signer = ctx.signer.ok_or(ChannelError::MissingSigningKey)?;
            let updated = make_update(channel, UpdateRequest::from(impression), Some(signer))?;
            effects.push(Effect::Deliver(ChannelUpdate {
                impression: impression.clone(),
                update: updated.head(),
            }));
            *channel = updated;
        }
        Role::Supply | Role::Market => {
            if channel.pending_impressions.contains_key(&impression.impression_id) {
                return Ok(());
            }
            park_impression(channel, impression.clone());
            if ctx.role == Role::Supply {
                effects.push(Effect::ScheduleEscalation {
                    channel_id: id,
                    impression_id: impression.impression_id,
                });
            }
        }
    }
    Ok(())
}

fn attested(
    state: &mut SyncState,
    market: Address,
    attestation: &Attestation,
    effects: &mut Vec<Effect>,
) {
    let impression_id = attestation.impression.impression_id;
    let recovered = recover_attestation(&impression_id, &attestation.signature);
    if recovered != market {
        warn!(
            impression = %impression_id,
            recovered = %recovered,
            "Discarding attestation not signed by market"
        );
        return;
    }
    let Some(id) = state.holding(&impression_id) else {
        debug!(impression = %impression_id, "Attestation for impression no longer pending");
        return;
    };
    let Some(channel) = state.channels.get_mut(&id) else {
        return;
    };
    channel.pending_impressions.remove(&impression_id);
    channel.attested.insert(impression_id, attestation.clone());
    effects.push(Effect::RequestUpdate {
        channel_id: id,
        attestation: attestation.clone(),
    });
}
