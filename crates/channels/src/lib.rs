//! Chat platform connections for Seedkeeper.
//!
//! Each platform implements `seedkeeper_core::Platform` and is driven by the
//! Gateway, which owns the only live connection.
//!
//! Available platforms:
//! - **Discord**: bot connection stub with in-process message injection
//! - **Console**: stdin/stdout for local runs

pub mod console;
pub mod discord;
pub mod history;

pub use console::ConsolePlatform;
pub use discord::{Delivery, DiscordConfig, DiscordPlatform};
pub use history::ChannelHistory;

use seedkeeper_config::GatewayConfig;
use seedkeeper_core::Platform;
use seedkeeper_core::error::PlatformError;
use std::sync::Arc;

/// Build the platform named in `[gateway] platform`.
pub fn from_config(config: &GatewayConfig) -> Result<Arc<dyn Platform>, PlatformError> {
    match config.platform.as_str() {
        "console" => Ok(Arc::new(ConsolePlatform::new())),
        "discord" => {
            let token = config
                .platform_token
                .clone()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| PlatformError::NotConfigured("DISCORD_BOT_TOKEN is not set".into()))?;
            Ok(Arc::new(DiscordPlatform::new(DiscordConfig::new(token))))
        }
        other => Err(PlatformError::NotConfigured(format!("unknown platform '{other}'"))),
    }
}
