//! # adchannel-sync
//!
//! **Per-role channel synchronization for AdChannel.**
//!
//! Demand, supply and the market each run one synchronizer over the same
//! event vocabulary:
//!
//! 1. **Reducer**: pure `(state, event) → (state, effects)` per role
//! 2. **Synchronizer**: persists accepted events, applies escalation timers
//! 3. **EscalationQueue**: deadlines for impressions supply is waiting on
//! 4. **ChannelStore**: append-only event log plus channel snapshots
//! 5. **ChannelActor**: a tokio task that serializes all mutation
//!
//! ## Event Flow
//!
//! ```text
//! beacon / peer / contract → ChannelHandle.dispatch() → reduce()
//!     → store.append() → effects (deliver, escalate, request, dispute)
//! ```
//!
//! On restart, [`ChannelSynchronizer::recover`] replays the log and
//! reschedules every unresolved impression from the current time.

pub mod actor;
pub mod escalation;
pub mod event;
pub mod reducer;
pub mod store;
pub mod synchronizer;
pub mod telemetry;

pub use actor::{ChannelHandle, spawn};
pub use escalation::{Escalation, EscalationQueue};
pub use event::ChannelEvent;
pub use reducer::{Effect, ReducerContext, Step, SyncState, reduce};
pub use store::{ChannelStore, MemoryStore};
pub use synchronizer::ChannelSynchronizer;
pub use telemetry::init_tracing;
