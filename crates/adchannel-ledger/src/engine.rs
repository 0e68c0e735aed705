//! The channel state-transition function.
//!
//! Given the same channel and the same request, [`make_update`] always
//! returns the same channel. Counterparties rely on this to re-derive and
//! check each other's roots without exchanging anything but the update.

use adchannel_commitment::{Keypair, fingerprint, recover, update_root};
use adchannel_types::{
    Channel, ChannelError, Result, Root, Signature, U256, Update, UpdateRequest,
};
use tracing::debug;

/// Reject requests that cannot be folded into any channel.
///
/// # Errors
/// `InvalidUpdate` if the price is zero or the impression id is missing.
pub fn is_valid_update(request: &UpdateRequest) -> Result<()> {
    if request.price.is_zero() {
        return Err(ChannelError::InvalidUpdate {
            reason: "price must be positive".into(),
        });
    }
    if !request.impression_id.is_well_formed() {
        return Err(ChannelError::InvalidUpdate {
            reason: "impression id is missing".into(),
        });
    }
    Ok(())
}

/// The update that folds `request` onto the channel's current head.
///
/// Signed with `signer` over the fingerprint of the new root when given.
pub fn next_update(
    channel: &Channel,
    request: UpdateRequest,
    signer: Option<&Keypair>,
) -> Result<Update> {
    is_valid_update(&request)?;
    let impressions = channel
        .impressions
        .checked_add(U256::one())
        .ok_or_else(|| ChannelError::InvalidUpdate {
            reason: "impression count overflow".into(),
        })?;
    let balance = channel
        .balance
        .checked_add(request.price)
        .ok_or_else(|| ChannelError::InvalidUpdate {
            reason: "balance overflow".into(),
        })?;

    let mut update = Update {
        identity: channel.identity,
        impression_id: request.impression_id,
        price: request.price,
        impressions,
        balance,
        root: Root::ZERO,
        prev_root: channel.root,
        signature: None,
    };
    update.root = update_root(&update, &channel.root);
    update.signature = signer.map(|key| key.sign_state(&update.identity, &update.root));
    Ok(update)
}

/// Move the channel head to `update`. Callers have already validated it.
fn advance(channel: &Channel, update: &Update) -> Channel {
    let mut next = channel.clone();
    next.impression_id = update.impression_id;
    next.price = update.price;
    next.impressions = update.impressions;
    next.balance = update.balance;
    next.prev_root = update.prev_root;
    next.root = update.root;
    next.signature = update.signature;
    next.record_applied(update.impression_id);
    next
}

/// Fold one impression into the channel, optionally signing the result.
///
/// Pure: the input channel is untouched and identical inputs yield
/// identical outputs.
///
/// # Errors
/// `InvalidUpdate` if the request fails [`is_valid_update`] or a counter
/// would overflow.
pub fn make_update(
    channel: &Channel,
    request: UpdateRequest,
    signer: Option<&Keypair>,
) -> Result<Channel> {
    let update = next_update(channel, request, signer)?;
    debug!(
        channel = %channel.channel_id(),
        impression = %update.impression_id,
        impressions = %update.impressions,
        balance = %update.balance,
        root = %update.root,
        "Channel updated"
    );
    Ok(advance(channel, &update))
}

/// Why `update` is not a direct continuation of `channel`, if it is not.
fn check_continuation(channel: &Channel, update: &Update) -> Result<()> {
    if update.identity != channel.identity {
        return Err(ChannelError::InvalidUpdate {
            reason: format!("update addressed to {}", update.identity.channel_id),
        });
    }
    if update.impressions <= channel.impressions {
        return Err(ChannelError::DuplicateUpdate {
            impressions: update.impressions,
        });
    }
    let expected = channel.impressions.saturating_add(U256::one());
    if update.impressions != expected {
        return Err(ChannelError::OutOfSequence {
            expected,
            got: update.impressions,
        });
    }
    let balance_chains = channel.balance.checked_add(update.price) == Some(update.balance);
    if !balance_chains || update.root != update_root(update, &channel.root) {
        return Err(ChannelError::HashChainBroken {
            impressions: update.impressions,
        });
    }
    Ok(())
}

/// Whether `update` is a valid, non-replayed continuation of `channel`.
///
/// True iff identities match, the count is exactly one higher, the balance
/// grew by exactly the price and the root is the merkle root of the
/// update's leaves chained onto the channel's current root.
#[must_use]
pub fn verify_update(channel: &Channel, update: &Update) -> bool {
    check_continuation(channel, update).is_ok()
}

/// The update's signature, if it recovers to the channel's demand address.
///
/// # Errors
/// `MissingSignature` if unsigned, `SignatureMismatch` if signed by anyone
/// else.
pub fn demand_signature(channel: &Channel, update: &Update) -> Result<Signature> {
    let signature = update
        .signature
        .ok_or(ChannelError::MissingSignature(update.impression_id))?;
    let expected = channel.identity.demand;
    let recovered = recover(&fingerprint(&update.identity, &update.root), &signature);
    if recovered != expected {
        return Err(ChannelError::SignatureMismatch { expected, recovered });
    }
    Ok(signature)
}

/// Apply a peer's signed update.
///
/// On top of [`verify_update`], the signature must recover to the channel's
/// demand address. The returned channel carries demand's signature.
///
/// # Errors
/// - `DuplicateUpdate`, `OutOfSequence`, `HashChainBroken` or `InvalidUpdate`
///   if the update does not extend the chain
/// - `MissingSignature` / `SignatureMismatch` if demand did not sign it
pub fn accept_update(channel: &Channel, update: &Update) -> Result<Channel> {
    check_continuation(channel, update)?;
    let signature = demand_signature(channel, update)?;

    let mut next = make_update(channel, UpdateRequest::from(update), None)?;
    next.signature = Some(signature);
    Ok(next)
}

/// Re-fold `updates` onto a checkpointed base, in impression order.
///
/// Only the impression ids and prices are taken from `updates`; counts,
/// balances and roots are recomputed. The head signature is carried over
/// from the last update so the result can be proposed on-chain.
pub fn replay(base: &Channel, updates: &[Update]) -> Result<Channel> {
    let mut ordered: Vec<&Update> = updates.iter().collect();
    ordered.sort_by_key(|u| u.impressions);
    let mut channel = base.clone();
    for update in &ordered {
        channel = make_update(&channel, UpdateRequest::from(*update), None)?;
    }
    if let Some(last) = ordered.last().filter(|last| last.root == channel.root) {
        channel.signature = last.signature;
    }
    Ok(channel)
}

/// Whether replaying `updates` from `base` reaches `expected_root`.
pub fn verify_history(base: &Channel, updates: &[Update], expected_root: &Root) -> Result<bool> {
    Ok(replay(base, updates)?.root == *expected_root)
}
