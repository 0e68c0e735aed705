//! Serializes all mutation of one role's channels through a tokio task.
//!
//! Callers hold a cheap, cloneable [`ChannelHandle`]; the task owns the
//! [`ChannelSynchronizer`] and processes commands one at a time, so no two
//! reducer applications for the same role ever overlap.

use adchannel_types::{Channel, ChannelError, ChannelId, Result};
use chrono::{DateTime, Utc};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::info;

use crate::{
    escalation::Escalation, event::ChannelEvent, reducer::Effect, store::ChannelStore,
    synchronizer::ChannelSynchronizer,
};

/// Default depth of the command queue.
pub const DEFAULT_MAILBOX: usize = 1024;

enum Command {
    Event {
        event: ChannelEvent,
        now: DateTime<Utc>,
        reply: oneshot::Sender<Result<Vec<Effect>>>,
    },
    Channel {
        id: ChannelId,
        reply: oneshot::Sender<Option<Channel>>,
    },
    DueEscalations {
        now: DateTime<Utc>,
        reply: oneshot::Sender<Vec<Escalation>>,
    },
}

fn stopped() -> ChannelError {
    ChannelError::Internal("channel actor stopped".into())
}

/// Client side of a running channel actor.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    tx: mpsc::Sender<Command>,
}

impl ChannelHandle {
    /// Submit an event stamped with the current time.
    pub async fn dispatch(&self, event: ChannelEvent) -> Result<Vec<Effect>> {
        self.dispatch_at(event, Utc::now()).await
    }

    /// Submit an event with an explicit arrival time.
    pub async fn dispatch_at(&self, event: ChannelEvent, now: DateTime<Utc>) -> Result<Vec<Effect>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Event { event, now, reply })
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }

    /// Current view of a channel.
    pub async fn channel(&self, id: ChannelId) -> Result<Option<Channel>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Channel { id, reply })
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    /// Escalations due at `now`.
    pub async fn due_escalations(&self, now: DateTime<Utc>) -> Result<Vec<Escalation>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::DueEscalations { now, reply })
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }
}

/// Spawn the actor. It stops once every handle is dropped and returns the
/// synchronizer through the join handle.
pub fn spawn<S>(
    mut sync: ChannelSynchronizer<S>,
    mailbox: usize,
) -> (ChannelHandle, JoinHandle<ChannelSynchronizer<S>>)
where
    S: ChannelStore + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel(mailbox.max(1));
    let task = tokio::spawn(async move {
        info!(role = %sync.role(), "Channel actor started");
        while let Some(command) = rx.recv().await {
            match command {
                Command::Event { event, now, reply } => {
                    let _ = reply.send(sync.handle(event, now));
                }
                Command::Channel { id, reply } => {
                    let _ = reply.send(sync.channel(&id).cloned());
                }
                Command::DueEscalations { now, reply } => {
                    let _ = reply.send(sync.due_escalations(now));
                }
            }
        }
        info!(role = %sync.role(), "Channel actor stopped");
        sync
    });
    (ChannelHandle { tx }, task)
}
