//! Deadlines for impressions supply is still waiting on.
//!
//! When supply sees an impression, it gives demand a fixed window to deliver
//! the signed update. Past the deadline, the impression is escalated to the
//! market for attestation.

use std::collections::BTreeMap;

use adchannel_types::{ChannelId, ImpressionId, SyncConfig};
use chrono::{DateTime, Duration, Utc};

/// One overdue impression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escalation {
    pub channel_id: ChannelId,
    pub impression_id: ImpressionId,
    pub deadline: DateTime<Utc>,
}

/// Pending deadlines keyed by impression id.
#[derive(Debug, Clone)]
pub struct EscalationQueue {
    timeout: Duration,
    deadlines: BTreeMap<ImpressionId, (ChannelId, DateTime<Utc>)>,
}

impl EscalationQueue {
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        let secs = i64::try_from(config.escalation_timeout_secs).unwrap_or(i64::MAX);
        Self {
            timeout: Duration::try_seconds(secs).unwrap_or_else(|| Duration::weeks(1)),
            deadlines: BTreeMap::new(),
        }
    }

    /// Start (or restart) the window for `impression_id` at `now`.
    pub fn schedule(&mut self, channel_id: ChannelId, impression_id: ImpressionId, now: DateTime<Utc>) {
        self.deadlines
            .insert(impression_id, (channel_id, self.deadline_from(now)));
    }

    fn deadline_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.timeout)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Stop waiting for `impression_id`. Returns whether it was scheduled.
    pub fn cancel(&mut self, impression_id: &ImpressionId) -> bool {
        self.deadlines.remove(impression_id).is_some()
    }

    /// Remove and return every escalation whose deadline is at or before `now`.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<Escalation> {
        let due: Vec<Escalation> = self
            .deadlines
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(impression_id, (channel_id, deadline))| Escalation {
                channel_id: *channel_id,
                impression_id: *impression_id,
                deadline: *deadline,
            })
            .collect();
        for escalation in &due {
            self.deadlines.remove(&escalation.impression_id);
        }
        due
    }

    /// Restart every window from `now`; used after a restart.
    pub fn reschedule_from(&mut self, now: DateTime<Utc>) {
        let deadline = self.deadline_from(now);
        for entry in self.deadlines.values_mut() {
            entry.1 = deadline;
        }
    }

    #[must_use]
    pub fn contains(&self, impression_id: &ImpressionId) -> bool {
        self.deadlines.contains_key(impression_id)
    }

    /// Earliest pending deadline, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.deadlines.values().map(|(_, d)| *d).min()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

impl Default for EscalationQueue {
    fn default() -> Self {
        Self::new(&SyncConfig::default())
    }
}
