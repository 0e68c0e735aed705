//! Deterministic parties for tests across the workspace.

use adchannel_types::{Channel, ChannelIdentity};

use crate::Keypair;

/// Demand, supply and market keys with fixed secrets.
#[derive(Debug, Clone)]
pub struct Parties {
    pub demand: Keypair,
    pub supply: Keypair,
    pub market: Keypair,
}

impl Parties {
    #[must_use]
    pub fn new() -> Self {
        Self {
            demand: Keypair::fixed(1),
            supply: Keypair::fixed(2),
            market: Keypair::fixed(3),
        }
    }

    /// The dummy identity rebound to these parties' addresses.
    #[must_use]
    pub fn identity(&self) -> ChannelIdentity {
        ChannelIdentity {
            demand: self.demand.address(),
            supply: self.supply.address(),
            ..ChannelIdentity::dummy()
        }
    }

    /// A freshly opened channel between these parties.
    #[must_use]
    pub fn channel(&self) -> Channel {
        Channel::opened(self.identity(), 100)
    }
}

impl Default for Parties {
    fn default() -> Self {
        Self::new()
    }
}
