//! Configuration types for AdChannel nodes.

use serde::{Deserialize, Serialize};

use crate::{constants, Address, ChannelError};

/// Which side of the channel a node plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Buys impressions; originates and signs every update.
    Demand,
    /// Serves impressions; verifies demand's updates and escalates gaps.
    Supply,
    /// Observes both sides and attests to impressions it saw.
    Market,
}

impl Role {
    /// Default HTTP port of this role's endpoint.
    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            Self::Demand => constants::DEFAULT_DEMAND_PORT,
            Self::Supply => constants::DEFAULT_SUPPLY_PORT,
            Self::Market => constants::DEFAULT_MARKET_PORT,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Demand => write!(f, "demand"),
            Self::Supply => write!(f, "supply"),
            Self::Market => write!(f, "market"),
        }
    }
}

/// Contract-level timing, in blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Blocks a proposal can be challenged for.
    pub challenge_period: u64,
    /// Blocks a channel stays open after open or renew.
    pub channel_timeout: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            challenge_period: constants::DEFAULT_CHALLENGE_PERIOD,
            channel_timeout: constants::DEFAULT_CHANNEL_TIMEOUT,
        }
    }
}

impl ProtocolConfig {
    /// Reject configurations under which no checkpoint could ever settle.
    pub fn validate(&self) -> Result<(), ChannelError> {
        if self.challenge_period == 0 {
            return Err(ChannelError::Configuration(
                "challenge_period must be at least one block".into(),
            ));
        }
        if self.channel_timeout == 0 {
            return Err(ChannelError::Configuration(
                "channel_timeout must be at least one block".into(),
            ));
        }
        Ok(())
    }
}

/// Synchronizer timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds to wait for demand's update before asking the market.
    pub escalation_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            escalation_timeout_secs: constants::DEFAULT_ESCALATION_TIMEOUT_SECS,
        }
    }
}

/// Where a party can be reached, as registered on the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub role: Role,
    pub address: Address,
    pub url: String,
}

impl EndpointConfig {
    /// Endpoint on localhost at the role's default port.
    #[must_use]
    pub fn local(role: Role, address: Address) -> Self {
        Self {
            role,
            address,
            url: format!("http://localhost:{}", role.default_port()),
        }
    }
}

/// Logging output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing-subscriber` `EnvFilter` directive.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: constants::DEFAULT_LOG_FILTER.to_string(),
            json: false,
        }
    }
}

/// Everything one node needs to run a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub endpoint: EndpointConfig,
    /// Ledger contract this node talks to.
    pub contract_id: Address,
    /// Market whose attestations supply trusts.
    pub market: Option<Address>,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl NodeConfig {
    /// Parse a JSON config document and validate it.
    pub fn from_json(raw: &str) -> Result<Self, ChannelError> {
        let cfg: Self = serde_json::from_str(raw)
            .map_err(|e| ChannelError::Configuration(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ChannelError> {
        self.protocol.validate()?;
        if self.endpoint.address.is_zero() {
            return Err(ChannelError::Configuration("endpoint address is zero".into()));
        }
        if self.endpoint.role == Role::Supply && self.market.is_none() {
            return Err(ChannelError::Configuration(
                "supply requires a market address for attestations".into(),
            ));
        }
        Ok(())
    }
}
