//! # adchannel-ledger
//!
//! **Pure channel accounting for AdChannel.**
//!
//! The ledger plane folds impressions into a channel and decides whether a
//! peer's update is a valid continuation. It has:
//!
//! - **Zero side effects**: every function takes a channel and returns a new one
//! - **Deterministic output**: both parties re-derive the same roots
//! - **Hash-chain checks**: no update is applied unless it extends the head
//! - **Reconciliation**: out-of-order updates are parked and drained in order
//!
//! ## Update Flow
//!
//! ```text
//! peer update → reconciler::receive() → engine::accept_update()
//!     → Applied (then drain parked) | Parked | Duplicate
//! ```

pub mod engine;
pub mod reconciler;

pub use engine::{
    accept_update, demand_signature, is_valid_update, make_update, next_update, replay,
    verify_history, verify_update,
};
pub use reconciler::{Reception, clear_impression, get_ready_updates, park_impression, receive};
