//! # adchannel-dispute
//!
//! **Checkpoint and dispute protocol for AdChannel.**
//!
//! A channel's off-chain history is anchored on the ledger by checkpoints.
//! Either party proposes a root; the counterparty has one challenge period
//! to prove a longer signed history; the proposer may answer with a longer
//! one still. The highest count that can be proven wins.
//!
//! ## Components
//!
//! 1. **LedgerContract**: the contract surface, as a trait
//! 2. **ContractMirror**: in-memory contract with a block clock, used for
//!    tests and simulation
//! 3. **DisputeCoordinator**: one party's root history, turned into
//!    proposals, challenge evidence and answers
//!
//! ## Checkpoint Flow
//!
//! ```text
//! propose ──▶ CHECKPOINT_PENDING ──(window elapses)──▶ checkpoint ──▶ OPEN / CLOSED
//!                  │        ▲
//!          challenge│        │ challenge (higher count) restarts the window
//!                  ▼        │
//!              challenged ──┘
//!                  │
//!   acceptChallenge (proposer, count above challenge) ──▶ committed at once
//! ```

pub mod contract;
pub mod coordinator;
pub mod mirror;

pub use contract::{LedgerContract, verify_claim};
pub use coordinator::{DisputeAction, DisputeCoordinator, DisputeOutcome, Evidence, RootEntry};
pub use mirror::ContractMirror;
