//! # adchannel-types
//!
//! Shared types, errors, and configuration for the **AdChannel** impression
//! payment channel.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`Address`], [`Bytes32`], [`Root`], [`ChannelId`], [`ImpressionId`]
//! - **Signatures**: [`Signature`] (65-byte recoverable `r ‖ s ‖ v`)
//! - **Channel model**: [`Channel`], [`ChannelIdentity`], [`ChannelState`], [`CheckpointKind`], [`Update`], [`UpdateRequest`]
//! - **Impressions**: [`Impression`], [`ChannelUpdate`], [`Attestation`]
//! - **Contract shapes**: [`ChannelRecord`], [`ChallengeRecord`], [`ImpressionsClaim`], [`SignedRoot`], [`ContractEvent`]
//! - **Configuration**: [`NodeConfig`], [`ProtocolConfig`], [`SyncConfig`], [`EndpointConfig`], [`LogConfig`], [`Role`]
//! - **Errors**: [`ChannelError`] with `AC_ERR_` prefix codes
//! - **Constants**: protocol constants and defaults

pub mod channel;
pub mod config;
pub mod constants;
pub mod contract;
pub mod error;
pub mod ids;
pub mod impression;
pub mod signature;

// Re-export all primary types at crate root for ergonomic imports:
//   use adchannel_types::{Channel, Update, Impression, ...};

pub use channel::*;
pub use config::*;
pub use contract::*;
pub use error::*;
pub use ids::*;
pub use impression::*;
pub use signature::*;

pub use primitive_types::U256;

// Constants are accessed via `adchannel_types::constants::FOO`
// (not re-exported to avoid name collisions).
