//! Persistence seam for the synchronizer.
//!
//! The store is append-only: accepted events in order, plus the latest
//! snapshot of each channel for quick reads. Recovery rebuilds state from
//! the event log alone; snapshots are only cross-checked.

use std::collections::BTreeMap;

use adchannel_types::{Channel, ChannelError, ChannelId, Result};

use crate::event::ChannelEvent;

/// Durable storage for one role's events and channel snapshots.
pub trait ChannelStore {
    /// Append an accepted event to the log.
    fn append(&mut self, event: &ChannelEvent) -> Result<()>;

    /// Every logged event, oldest first.
    fn events(&self) -> Result<Vec<ChannelEvent>>;

    /// Replace the snapshot of `channel`.
    fn save_snapshot(&mut self, channel: &Channel) -> Result<()>;

    /// Latest snapshot of a channel, if one was saved.
    fn snapshot(&self, channel_id: &ChannelId) -> Result<Option<Channel>>;
}

/// In-memory store holding events as JSON lines.
///
/// Serializing on every write keeps the in-memory and on-disk forms
/// identical, so a restart from [`MemoryStore::from_json_lines`] replays
/// exactly what a file-backed store would.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    log: Vec<String>,
    snapshots: BTreeMap<ChannelId, String>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The event log as newline-separated JSON.
    #[must_use]
    pub fn to_json_lines(&self) -> String {
        let mut out = self.log.join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }

    /// Rebuild a store from a JSON-lines event log. Snapshots start empty.
    pub fn from_json_lines(raw: &str) -> Result<Self> {
        let mut log = Vec::new();
        for (n, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            serde_json::from_str::<ChannelEvent>(line).map_err(|e| {
                ChannelError::Store(format!("line {}: {e}", n + 1))
            })?;
            log.push(line.to_string());
        }
        Ok(Self {
            log,
            snapshots: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.log.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}

impl ChannelStore for MemoryStore {
    fn append(&mut self, event: &ChannelEvent) -> Result<()> {
        self.log.push(serde_json::to_string(event)?);
        Ok(())
    }

    fn events(&self) -> Result<Vec<ChannelEvent>> {
        self.log
            .iter()
            .map(|line| serde_json::from_str(line).map_err(ChannelError::from))
            .collect()
    }

    fn save_snapshot(&mut self, channel: &Channel) -> Result<()> {
        self.snapshots
            .insert(channel.channel_id(), serde_json::to_string(channel)?);
        Ok(())
    }

    fn snapshot(&self, channel_id: &ChannelId) -> Result<Option<Channel>> {
        self.snapshots
            .get(channel_id)
            .map(|raw| serde_json::from_str(raw).map_err(ChannelError::from))
            .transpose()
    }
}
