//! Integration test: three roles over one channel
//!
//! Demand, supply and the market each run their own synchronizer. Messages
//! between them are delivered by hand, out of order where it matters, and
//! all three must agree on the channel head afterwards.

use adchannel_commitment::fixtures::Parties;
use adchannel_sync::{ChannelEvent, ChannelSynchronizer, Effect, MemoryStore, actor};
use adchannel_types::*;
use chrono::{Duration, Utc};

fn open_event(p: &Parties) -> ChannelEvent {
    ChannelEvent::ChannelOpened {
        record: ChannelRecord {
            identity: p.identity(),
            root: Root::ZERO,
            state: ChannelState::Open,
            expiration: 20,
            challenge_timeout: 0,
            proposed_root: Root::ZERO,
        },
    }
}

fn impression(p: &Parties, n: u8, price: u64) -> Impression {
    Impression {
        impression_id: ImpressionId(Bytes32([n; 32])),
        price: U256::from(price),
        supply_id: p.supply.address(),
        demand_id: p.demand.address(),
        timestamp: Utc::now(),
    }
}

struct Roles {
    demand: ChannelSynchronizer<MemoryStore>,
    supply: ChannelSynchronizer<MemoryStore>,
    market: ChannelSynchronizer<MemoryStore>,
}

fn roles(p: &Parties) -> Roles {
    let cfg = SyncConfig::default();
    let now = Utc::now();
    let mut r = Roles {
        demand: ChannelSynchronizer::new(
            Role::Demand,
            Some(p.demand.clone()),
            None,
            &cfg,
            MemoryStore::new(),
        ),
        supply: ChannelSynchronizer::new(
            Role::Supply,
            None,
            Some(p.market.address()),
            &cfg,
            MemoryStore::new(),
        ),
        market: ChannelSynchronizer::new(
            Role::Market,
            Some(p.market.clone()),
            None,
            &cfg,
            MemoryStore::new(),
        ),
    };
    for sync in [&mut r.demand, &mut r.supply, &mut r.market] {
        sync.handle(open_event(p), now).unwrap();
    }
    r
}

/// Serve on demand and collect the updates it would deliver.
fn serve(r: &mut Roles, imp: &Impression) -> ChannelUpdate {
    let now = Utc::now();
    let effects = r
        .demand
        .handle(ChannelEvent::ImpressionServed(imp.clone()), now)
        .unwrap();
    match effects.as_slice() {
        [Effect::Deliver(message)] => message.clone(),
        other => panic!("expected one delivery, got {other:?}"),
    }
}

#[test]
fn reversed_delivery_converges_on_all_roles() {
    let p = Parties::new();
    let mut r = roles(&p);
    let id = p.identity().channel_id;
    let now = Utc::now();

    let imps: Vec<Impression> = (1..=4).map(|n| impression(&p, n, u64::from(n) * 2)).collect();
    let messages: Vec<ChannelUpdate> = imps.iter().map(|imp| serve(&mut r, imp)).collect();

    for imp in &imps {
        r.supply.handle(ChannelEvent::ImpressionServed(imp.clone()), now).unwrap();
        r.market.handle(ChannelEvent::ImpressionServed(imp.clone()), now).unwrap();
    }
    assert_eq!(r.supply.escalations().len(), 4);

    for message in messages.iter().rev() {
        r.supply.handle(ChannelEvent::ChannelUpdate(message.clone()), now).unwrap();
        r.market.handle(ChannelEvent::ChannelUpdate(message.clone()), now).unwrap();
    }

    let head = r.demand.channel(&id).unwrap().clone();
    assert_eq!(head.impressions, U256::from(4));
    assert_eq!(head.balance, U256::from(2 + 4 + 6 + 8));
    for sync in [&r.supply, &r.market] {
        let c = sync.channel(&id).unwrap();
        assert_eq!(c.root, head.root);
        assert_eq!(c.balance, head.balance);
        assert!(c.pending_updates.is_empty());
        assert!(c.pending_impressions.is_empty());
    }
    assert!(r.supply.escalations().is_empty());
}

#[test]
fn update_before_beacon_needs_no_escalation() {
    let p = Parties::new();
    let mut r = roles(&p);
    let now = Utc::now();
    let imp = impression(&p, 1, 5);
    let message = serve(&mut r, &imp);

    r.supply.handle(ChannelEvent::ChannelUpdate(message), now).unwrap();
    let effects = r.supply.handle(ChannelEvent::ImpressionServed(imp), now).unwrap();
    assert!(effects.is_empty());
    assert!(r.supply.escalations().is_empty());
}

#[test]
fn withheld_update_escalates_to_market() {
    let p = Parties::new();
    let mut r = roles(&p);
    let id = p.identity().channel_id;
    let t0 = Utc::now();
    let seen = impression(&p, 1, 5);
    let unknown = impression(&p, 2, 5);

    // demand serves but never delivers
    let _withheld = serve(&mut r, &seen);
    r.market.handle(ChannelEvent::ImpressionServed(seen.clone()), t0).unwrap();
    r.supply.handle(ChannelEvent::ImpressionServed(seen.clone()), t0).unwrap();
    r.supply.handle(ChannelEvent::ImpressionServed(unknown.clone()), t0).unwrap();

    let due = r.supply.due_escalations(t0 + Duration::seconds(10));
    let ids: Vec<ImpressionId> = due.iter().map(|e| e.impression_id).collect();
    assert_eq!(ids.len(), 2);

    let (attestations, missing) = r.market.attest_impressions(&ids).unwrap();
    assert_eq!(attestations.len(), 1);
    assert_eq!(missing, vec![unknown.impression_id]);

    let effects = r
        .supply
        .handle(ChannelEvent::SignaturesReceived(attestations), t0)
        .unwrap();
    assert!(matches!(
        effects.as_slice(),
        [Effect::RequestUpdate { attestation, .. }] if attestation.impression.impression_id == seen.impression_id
    ));
    r.supply
        .handle(ChannelEvent::ImpressionNotFound { ids: missing }, t0)
        .unwrap();

    let c = r.supply.channel(&id).unwrap();
    assert!(c.pending_impressions.is_empty());
    assert!(c.attested.contains_key(&seen.impression_id));
}

#[test]
fn recovery_replays_and_reschedules() {
    let p = Parties::new();
    let mut r = roles(&p);
    let id = p.identity().channel_id;
    let t0 = Utc::now();

    let first = impression(&p, 1, 3);
    let second = impression(&p, 2, 4);
    let m1 = serve(&mut r, &first);
    let m2 = serve(&mut r, &second);
    r.supply.handle(ChannelEvent::ImpressionServed(first), t0).unwrap();
    r.supply.handle(ChannelEvent::ImpressionServed(second.clone()), t0).unwrap();
    r.supply.handle(ChannelEvent::ChannelUpdate(m2), t0).unwrap();
    r.supply.handle(ChannelEvent::ChannelUpdate(m1), t0).unwrap();
    let third = impression(&p, 3, 5);
    r.supply.handle(ChannelEvent::ImpressionServed(third.clone()), t0).unwrap();
    let before = r.supply.channel(&id).unwrap().clone();

    // restart from the persisted log only
    let log = r.supply.into_store().to_json_lines();
    let store = MemoryStore::from_json_lines(&log).unwrap();
    let restart = t0 + Duration::hours(1);
    let mut recovered = ChannelSynchronizer::recover(
        Role::Supply,
        None,
        Some(p.market.address()),
        &SyncConfig::default(),
        store,
        restart,
    )
    .unwrap();

    assert_eq!(recovered.channel(&id), Some(&before));
    assert_eq!(recovered.escalations().len(), 1);
    assert!(recovered.escalations().contains(&third.impression_id));
    assert!(recovered.due_escalations(restart + Duration::seconds(9)).is_empty());
    assert_eq!(recovered.due_escalations(restart + Duration::seconds(10)).len(), 1);
}

#[test]
fn demand_recovery_reproduces_signed_head() {
    let p = Parties::new();
    let mut r = roles(&p);
    let id = p.identity().channel_id;
    for n in 1..=3 {
        serve(&mut r, &impression(&p, n, 7));
    }
    let head = r.demand.channel(&id).unwrap().clone();
    let recovered = ChannelSynchronizer::recover(
        Role::Demand,
        Some(p.demand.clone()),
        None,
        &SyncConfig::default(),
        r.demand.into_store(),
        Utc::now(),
    )
    .unwrap();
    assert_eq!(recovered.channel(&id), Some(&head));
}

#[tokio::test]
async fn actor_serializes_events() {
    let p = Parties::new();
    let sync = ChannelSynchronizer::new(
        Role::Demand,
        Some(p.demand.clone()),
        None,
        &SyncConfig::default(),
        MemoryStore::new(),
    );
    let (handle, task) = actor::spawn(sync, actor::DEFAULT_MAILBOX);
    handle.dispatch(open_event(&p)).await.unwrap();

    let mut joins = Vec::new();
    for n in 1..=8u8 {
        let h = handle.clone();
        let imp = impression(&p, n, 1);
        joins.push(tokio::spawn(async move {
            h.dispatch(ChannelEvent::ImpressionServed(imp)).await
        }));
    }
    for j in joins {
        let effects = j.await.unwrap().unwrap();
        assert!(matches!(effects.as_slice(), [Effect::Deliver(_)]));
    }

    let id = p.identity().channel_id;
    let c = handle.channel(id).await.unwrap().unwrap();
    assert_eq!(c.impressions, U256::from(8));
    assert_eq!(c.balance, U256::from(8));
    assert!(handle.due_escalations(Utc::now()).await.unwrap().is_empty());

    drop(handle);
    let sync = task.await.unwrap();
    assert_eq!(sync.store().len(), 9);
}
