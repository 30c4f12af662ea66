//! Process plumbing shared by the long-running commands.

use anyhow::Context;
use seedkeeper_config::AppConfig;
use seedkeeper_core::Provider;
use seedkeeper_providers::AnthropicProvider;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

pub fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// The config at `path` (or the default location) with environment
/// overrides applied.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let Some(path) = path else {
        return AppConfig::load().context("Failed to load config");
    };
    let mut config = AppConfig::load_from(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    config.apply_env(|name| std::env::var(name).ok());
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

pub fn provider(config: &AppConfig) -> anyhow::Result<Arc<dyn Provider>> {
    let provider = AnthropicProvider::from_config(&config.backend)
        .context("Backend not configured (set ANTHROPIC_API_KEY)")?;
    Ok(Arc::new(provider))
}

/// Flips to `true` on Ctrl+C.
pub fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!(error = %e, "Signal handler unavailable; stopping"),
        }
        let _ = tx.send(true);
    });
    rx
}
