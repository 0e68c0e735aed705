//! Protocol constants for AdChannel.

/// Number of leaves committed per update.
pub const LEAF_COUNT: usize = 5;

/// 1-based merkle position of the impression-count leaf.
///
/// Leaves are `[id, price, impressions, balance, prevRoot]`, so the count
/// sits at array slot 2, position 3.
pub const IMPRESSIONS_LEAF_INDEX: u64 = 3;

/// Prefix prepended to a 32-byte digest before signing.
pub const ETH_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

/// Applied impression ids each channel remembers for duplicate beacons.
pub const RECENT_IMPRESSIONS_WINDOW: usize = 4096;

/// Blocks a checkpoint proposal stays open to challenges.
pub const DEFAULT_CHALLENGE_PERIOD: u64 = 10;

/// Blocks a channel lives after opening or renewal.
pub const DEFAULT_CHANNEL_TIMEOUT: u64 = 20;

/// Seconds supply waits for a signed update before escalating.
pub const DEFAULT_ESCALATION_TIMEOUT_SECS: u64 = 10;

/// Default demand endpoint port.
pub const DEFAULT_DEMAND_PORT: u16 = 3000;

/// Default supply endpoint port.
pub const DEFAULT_SUPPLY_PORT: u16 = 3001;

/// Default market endpoint port.
pub const DEFAULT_MARKET_PORT: u16 = 3002;

/// Default `tracing` filter directive.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
