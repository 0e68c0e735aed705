//! Restores total order over peer updates that arrive out of order.
//!
//! Updates that do not directly extend the head are parked in the channel's
//! `pending_updates`, sorted by impression count. Whenever the head moves,
//! the contiguous run that now extends it is drained and applied.
//!
//! Impressions observed locally but not yet covered by a peer update are
//! parked in `pending_impressions`, keyed by impression id: the beacon and
//! the peer's update race, so their order carries no information.

use adchannel_types::{Channel, ChannelError, Impression, ImpressionId, Result, U256, Update};
use tracing::{debug, warn};

use crate::engine::{accept_update, demand_signature};

/// What happened to an incoming peer update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reception {
    /// The update (and `count - 1` parked successors) moved the head.
    Applied { count: usize },
    /// The update is ahead of the head and waits for its predecessors.
    Parked,
    /// The update was already consumed or is already parked.
    Duplicate,
}

/// Split `pending` into the run that extends `n` and the remainder.
///
/// Entries at or below `n` and repeated counts are dropped first. The ready
/// run is the longest prefix whose counts are exactly `n+1, n+2, …`; the
/// first gap ends it and everything after the gap is the remainder.
#[must_use]
pub fn get_ready_updates(n: U256, mut pending: Vec<Update>) -> (Vec<Update>, Vec<Update>) {
    pending.retain(|u| u.impressions > n);
    pending.sort_by_key(|u| u.impressions);
    pending.dedup_by_key(|u| u.impressions);

    let mut expected = n;
    let split = pending
        .iter()
        .position(|u| {
            expected = expected.saturating_add(U256::one());
            u.impressions != expected
        })
        .unwrap_or(pending.len());
    let remainder = pending.split_off(split);
    (pending, remainder)
}

/// Apply every parked update that now extends the head.
///
/// A ready entry that fails verification is discarded and draining stops;
/// later entries stay parked until a valid replacement arrives.
fn drain(mut channel: Channel) -> (Channel, usize) {
    let pending = std::mem::take(&mut channel.pending_updates);
    let (ready, mut remainder) = get_ready_updates(channel.impressions, pending);
    let mut applied = 0;

    let mut ready = ready.into_iter();
    for update in ready.by_ref() {
        match accept_update(&channel, &update) {
            Ok(next) => {
                channel = next;
                applied += 1;
            }
            Err(e) => {
                warn!(
                    channel = %channel.channel_id(),
                    impressions = %update.impressions,
                    error = %e,
                    "Discarding parked update"
                );
                break;
            }
        }
    }
    remainder.extend(ready);
    remainder.sort_by_key(|u| u.impressions);
    channel.pending_updates = remainder;
    (channel, applied)
}

/// Take in a peer update: apply it and drain, park it, or drop it.
///
/// The input channel is never mutated. Duplicates return an identical
/// channel.
///
/// # Errors
/// - `ChannelNotOpen` if the channel is closed
/// - `InvalidUpdate` if the update belongs to another channel
/// - any [`accept_update`] error when the update extends the head but is
///   not valid; the update is then discarded
/// - `MissingSignature` / `SignatureMismatch` if an update ahead of the
///   head is not signed by demand; it is never parked
/// - `InvalidUpdate` if demand already signed a different update at the
///   same count and that one is parked
pub fn receive(channel: &Channel, update: Update) -> Result<(Channel, Reception)> {
    if !channel.accepts_updates() {
        return Err(ChannelError::ChannelNotOpen {
            channel_id: channel.channel_id(),
            state: channel.state,
        });
    }
    if update.identity != channel.identity {
        return Err(ChannelError::InvalidUpdate {
            reason: format!("update addressed to {}", update.identity.channel_id),
        });
    }

    if update.impressions <= channel.impressions {
        debug!(
            channel = %channel.channel_id(),
            impressions = %update.impressions,
            head = %channel.impressions,
            "Dropping consumed update"
        );
        return Ok((channel.clone(), Reception::Duplicate));
    }

    if update.impressions == channel.impressions.saturating_add(U256::one()) {
        let next = accept_update(channel, &update)?;
        let (next, drained) = drain(next);
        return Ok((next, Reception::Applied { count: drained + 1 }));
    }

    demand_signature(channel, &update)?;

    let mut next = channel.clone();
    let at = next
        .pending_updates
        .partition_point(|parked| parked.impressions < update.impressions);
    match next.pending_updates.get(at) {
        Some(parked) if parked.impressions == update.impressions => {
            if *parked == update {
                return Ok((channel.clone(), Reception::Duplicate));
            }
            if demand_signature(channel, parked).is_ok() {
                return Err(ChannelError::InvalidUpdate {
                    reason: format!(
                        "conflicts with parked demand-signed update at impressions {}",
                        update.impressions
                    ),
                });
            }
            warn!(
                channel = %channel.channel_id(),
                impressions = %update.impressions,
                "Replacing unverifiable parked update"
            );
            next.pending_updates[at] = update;
        }
        _ => {
            warn!(
                channel = %channel.channel_id(),
                impressions = %update.impressions,
                head = %channel.impressions,
                "Parking out-of-order update"
            );
            next.pending_updates.insert(at, update);
        }
    }
    Ok((next, Reception::Parked))
}

/// Remember a locally observed impression until its update arrives.
pub fn park_impression(channel: &mut Channel, impression: Impression) {
    channel
        .pending_impressions
        .insert(impression.impression_id, impression);
}

/// Forget a parked impression; returns it if it was parked.
pub fn clear_impression(channel: &mut Channel, id: &ImpressionId) -> Option<Impression> {
    channel.attested.remove(id);
    channel.pending_impressions.remove(id)
}
