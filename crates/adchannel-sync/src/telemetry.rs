//! Process-wide `tracing` subscriber setup.

use adchannel_types::{ChannelError, LogConfig, Result};
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG`, when set, takes precedence over `config.filter`.
///
/// # Errors
/// `Configuration` if the filter does not parse or a subscriber is already
/// installed.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| ChannelError::Configuration(format!("log filter: {e}")))?;

    let builder = fmt().with_env_filter(filter).with_target(false);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ChannelError::Configuration(format!("tracing subscriber: {e}")))
}
