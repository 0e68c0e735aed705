//! Drives one role's reducer against its store and escalation timers.
//!
//! The synchronizer owns the only mutable copy of a role's channel state.
//! Each event is reduced first; only accepted events are appended to the
//! log, and the append is what commits the new state. A rejected event is
//! logged and leaves both the state and the log untouched.

use std::collections::BTreeMap;

use adchannel_commitment::{Keypair, attest};
use adchannel_types::{
    Address, Attestation, Channel, ChannelError, ChannelId, ImpressionId, NodeConfig, Result,
    Role, SyncConfig,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    escalation::{Escalation, EscalationQueue},
    event::ChannelEvent,
    reducer::{Effect, ReducerContext, SyncState, reduce},
    store::ChannelStore,
};

/// One role's channel state machine with its collaborators.
#[derive(Debug)]
pub struct ChannelSynchronizer<S: ChannelStore> {
    role: Role,
    signer: Option<Keypair>,
    market: Option<Address>,
    state: SyncState,
    store: S,
    escalations: EscalationQueue,
}

impl<S: ChannelStore> ChannelSynchronizer<S> {
    /// A synchronizer with no channels.
    #[must_use]
    pub fn new(
        role: Role,
        signer: Option<Keypair>,
        market: Option<Address>,
        sync: &SyncConfig,
        store: S,
    ) -> Self {
        Self {
            role,
            signer,
            market,
            state: SyncState::default(),
            store,
            escalations: EscalationQueue::new(sync),
        }
    }

    /// A synchronizer for the role described by `config`.
    #[must_use]
    pub fn from_config(config: &NodeConfig, signer: Option<Keypair>, store: S) -> Self {
        Self::new(config.endpoint.role, signer, config.market, &config.sync, store)
    }

    fn context(&self) -> ReducerContext<'_> {
        ReducerContext {
            role: self.role,
            signer: self.signer.as_ref(),
            market: self.market,
        }
    }

    /// Reduce, persist and commit one event.
    ///
    /// Escalation effects are applied to the internal queue; every effect
    /// is also returned so the caller can deliver messages.
    ///
    /// # Errors
    /// The reducer's error if the event is rejected, or a store error if it
    /// could not be appended. In both cases nothing changes. Once the event
    /// is logged the new state is committed; a failed snapshot is only
    /// logged, since recovery rebuilds from the event log.
    pub fn handle(&mut self, event: ChannelEvent, now: DateTime<Utc>) -> Result<Vec<Effect>> {
        let step = match reduce(&self.context(), &self.state, &event) {
            Ok(step) => step,
            Err(e) => {
                warn!(role = %self.role, event = event.kind(), error = %e, "Event rejected");
                return Err(e);
            }
        };

        self.store.append(&event)?;
        let previous = std::mem::replace(&mut self.state, step.state);
        for (id, channel) in &self.state.channels {
            if previous.channel(id) == Some(channel) {
                continue;
            }
            if let Err(e) = self.store.save_snapshot(channel) {
                warn!(role = %self.role, channel = %id, error = %e, "Snapshot not saved");
            }
        }

        for effect in &step.effects {
            match effect {
                Effect::ScheduleEscalation { channel_id, impression_id } => {
                    self.escalations.schedule(*channel_id, *impression_id, now);
                }
                Effect::CancelEscalation { impression_id } => {
                    self.escalations.cancel(impression_id);
                }
                Effect::Deliver(_) | Effect::RequestUpdate { .. } | Effect::ProposalDisputed { .. } => {}
            }
        }
        debug!(role = %self.role, event = event.kind(), effects = step.effects.len(), "Event applied");
        Ok(step.effects)
    }

    /// Pop escalations whose deadline has passed and that are still unresolved.
    pub fn due_escalations(&mut self, now: DateTime<Utc>) -> Vec<Escalation> {
        let due: Vec<Escalation> = self
            .escalations
            .due(now)
            .into_iter()
            .filter(|e| {
                self.state
                    .channel(&e.channel_id)
                    .is_some_and(|c| c.pending_impressions.contains_key(&e.impression_id))
            })
            .collect();
        for e in &due {
            info!(channel = %e.channel_id, impression = %e.impression_id, "Escalating withheld impression");
        }
        due
    }

    /// Answer supply's request for proof of escalated impressions.
    ///
    /// Impressions found in the logged beacons are attested with this
    /// node's key; the rest are reported as not found.
    ///
    /// # Errors
    /// `MissingSigningKey` without a key, or a store error.
    pub fn attest_impressions(
        &self,
        ids: &[ImpressionId],
    ) -> Result<(Vec<Attestation>, Vec<ImpressionId>)> {
        let key = self.signer.as_ref().ok_or(ChannelError::MissingSigningKey)?;
        let mut seen = BTreeMap::new();
        for event in self.store.events()? {
            if let ChannelEvent::ImpressionServed(impression) = event {
                seen.entry(impression.impression_id).or_insert(impression);
            }
        }

        let mut attested = Vec::new();
        let mut missing = Vec::new();
        for id in ids {
            match seen.get(id) {
                Some(impression) => attested.push(Attestation {
                    impression: impression.clone(),
                    signature: attest(key, id),
                }),
                None => missing.push(*id),
            }
        }
        info!(
            role = %self.role,
            attested = attested.len(),
            missing = missing.len(),
            "Answered signature request"
        );
        Ok((attested, missing))
    }

    /// Rebuild a synchronizer by replaying `store`'s event log.
    ///
    /// Events the reducer rejects on replay were never logged by
    /// [`handle`](Self::handle), so a rejection here means the log was
    /// edited; it is skipped with a warning. Every still-pending impression
    /// gets a fresh escalation window starting at `now`.
    pub fn recover(
        role: Role,
        signer: Option<Keypair>,
        market: Option<Address>,
        sync: &SyncConfig,
        store: S,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let mut this = Self::new(role, signer, market, sync, store);
        let events = this.store.events()?;
        let replayed = events.len();
        for event in &events {
            match reduce(&this.context(), &this.state, event) {
                Ok(step) => this.state = step.state,
                Err(e) => warn!(role = %role, event = event.kind(), error = %e, "Skipping event on replay"),
            }
        }

        for channel in this.state.channels.values() {
            if let Some(snapshot) = this.store.snapshot(&channel.channel_id())? {
                if snapshot != *channel {
                    warn!(channel = %channel.channel_id(), "Snapshot diverges from replayed log");
                }
            }
        }

        if role == Role::Supply {
            for channel in this.state.channels.values() {
                for (impression_id, impression) in &channel.pending_impressions {
                    this.escalations
                        .schedule(channel.channel_id(), *impression_id, impression.timestamp);
                }
            }
            this.escalations.reschedule_from(now);
        }
        info!(
            role = %role,
            events = replayed,
            channels = this.state.channels.len(),
            escalations = this.escalations.len(),
            "Recovered channel state"
        );
        Ok(this)
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn state(&self) -> &SyncState {
        &self.state
    }

    #[must_use]
    pub fn channel(&self, id: &ChannelId) -> Option<&Channel> {
        self.state.channel(id)
    }

    #[must_use]
    pub fn escalations(&self) -> &EscalationQueue {
        &self.escalations
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Hand back the store, e.g. to simulate a restart.
    #[must_use]
    pub fn into_store(self) -> S {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use adchannel_commitment::fixtures::Parties;
    use adchannel_types::{Bytes32, ChannelRecord, ChannelState, Impression, ImpressionId, Root, U256};
    use chrono::Duration;

    use super::*;
    use crate::store::MemoryStore;

    fn opened(p: &Parties) -> ChannelEvent {
        ChannelEvent::ChannelOpened {
            record: ChannelRecord {
                identity: p.identity(),
                root: Root::ZERO,
                state: ChannelState::Open,
                expiration: 100,
                challenge_timeout: 0,
                proposed_root: Root::ZERO,
            },
        }
    }

    fn served(p: &Parties, b: u8) -> ChannelEvent {
        ChannelEvent::ImpressionServed(Impression {
            impression_id: ImpressionId(Bytes32([b; 32])),
            price: U256::from(3),
            supply_id: p.supply.address(),
            demand_id: p.demand.address(),
            timestamp: Utc::now(),
        })
    }

    fn supply(p: &Parties) -> ChannelSynchronizer<MemoryStore> {
        ChannelSynchronizer::new(
            Role::Supply,
            None,
            Some(p.market.address()),
            &SyncConfig::default(),
            MemoryStore::new(),
        )
    }

    #[test]
    fn rejected_event_is_not_logged() {
        let p = Parties::new();
        let mut sync = supply(&p);
        let now = Utc::now();
        assert!(sync.handle(served(&p, 1), now).is_err());
        assert!(sync.store().is_empty());
        assert!(sync.state().channels.is_empty());
    }

    #[test]
    fn supply_escalates_after_timeout() {
        let p = Parties::new();
        let mut sync = supply(&p);
        let t0 = Utc::now();
        sync.handle(opened(&p), t0).unwrap();
        sync.handle(served(&p, 1), t0).unwrap();
        assert_eq!(sync.escalations().len(), 1);
        assert!(sync.due_escalations(t0 + Duration::seconds(5)).is_empty());
        let due = sync.due_escalations(t0 + Duration::seconds(10));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].impression_id, ImpressionId(Bytes32([1; 32])));
    }

    #[test]
    fn resolved_impression_never_escalates() {
        let p = Parties::new();
        let mut sync = supply(&p);
        let t0 = Utc::now();
        sync.handle(opened(&p), t0).unwrap();
        sync.handle(served(&p, 1), t0).unwrap();
        sync.handle(
            ChannelEvent::ImpressionNotFound { ids: vec![ImpressionId(Bytes32([1; 32]))] },
            t0,
        )
        .unwrap();
        assert!(sync.escalations().is_empty());
        assert!(sync.due_escalations(t0 + Duration::seconds(60)).is_empty());
    }

    /// Logs events but refuses every snapshot.
    #[derive(Debug, Default)]
    struct SnapshotlessStore(MemoryStore);

    impl ChannelStore for SnapshotlessStore {
        fn append(&mut self, event: &ChannelEvent) -> Result<()> {
            self.0.append(event)
        }

        fn events(&self) -> Result<Vec<ChannelEvent>> {
            self.0.events()
        }

        fn save_snapshot(&mut self, _channel: &Channel) -> Result<()> {
            Err(ChannelError::Store("disk full".into()))
        }

        fn snapshot(&self, _channel_id: &ChannelId) -> Result<Option<Channel>> {
            Ok(None)
        }
    }

    #[test]
    fn failed_snapshot_still_commits_logged_event() {
        let p = Parties::new();
        let cfg = SyncConfig::default();
        let mut sync = ChannelSynchronizer::new(
            Role::Supply,
            None,
            Some(p.market.address()),
            &cfg,
            SnapshotlessStore::default(),
        );
        let t0 = Utc::now();
        sync.handle(opened(&p), t0).unwrap();
        sync.handle(served(&p, 1), t0).unwrap();
        let id = p.identity().channel_id;
        assert_eq!(sync.channel(&id).unwrap().pending_impressions.len(), 1);
        assert_eq!(sync.escalations().len(), 1);

        let live = sync.state().clone();
        let store = sync.into_store();
        let replayed =
            ChannelSynchronizer::recover(Role::Supply, None, Some(p.market.address()), &cfg, store, t0).unwrap();
        assert_eq!(replayed.state(), &live);
    }

    #[test]
    fn recovery_restarts_windows_from_now() {
        let p = Parties::new();
        let cfg = SyncConfig::default();
        let mut sync = supply(&p);
        let t0 = Utc::now();
        sync.handle(opened(&p), t0).unwrap();
        sync.handle(served(&p, 1), t0).unwrap();

        let restart = t0 + Duration::hours(2);
        let mut back = ChannelSynchronizer::recover(
            Role::Supply,
            None,
            Some(p.market.address()),
            &cfg,
            sync.into_store(),
            restart,
        )
        .unwrap();
        assert_eq!(back.escalations().next_deadline(), Some(restart + Duration::seconds(10)));
        assert!(back.due_escalations(restart + Duration::seconds(9)).is_empty());
        assert_eq!(back.due_escalations(restart + Duration::seconds(10)).len(), 1);
    }

    #[test]
    fn snapshots_follow_state() {
        let p = Parties::new();
        let mut sync = supply(&p);
        let now = Utc::now();
        sync.handle(opened(&p), now).unwrap();
        sync.handle(served(&p, 1), now).unwrap();
        let id = p.identity().channel_id;
        let snap = sync.store().snapshot(&id).unwrap().unwrap();
        assert_eq!(Some(&snap), sync.channel(&id));
    }
}
