//! `seedkeeper config`: show the effective configuration or write a default
//! file.

use crate::runtime;
use anyhow::{Context, bail};
use clap::Subcommand;
use seedkeeper_config::AppConfig;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration (secrets redacted)
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn run(config_path: Option<&Path>, action: ConfigCommand) -> anyhow::Result<()> {
    match action {
        ConfigCommand::Show => {
            let mut config = runtime::load_config(config_path)?;
            redact(&mut config);
            println!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigCommand::Init { force } => {
            let path = config_path
                .map(Path::to_path_buf)
                .unwrap_or_else(default_path);
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Cannot create {}", dir.display()))?;
            }
            std::fs::write(&path, AppConfig::default_toml())
                .with_context(|| format!("Cannot write {}", path.display()))?;
            println!("🌱 Wrote {}", path.display());
            println!("   Set ANTHROPIC_API_KEY and DISCORD_BOT_TOKEN in the environment.");
        }
    }
    Ok(())
}

fn default_path() -> PathBuf {
    AppConfig::config_dir().join("config.toml")
}

fn redact(config: &mut AppConfig) {
    const HIDDEN: &str = "[REDACTED]";
    for secret in [
        &mut config.backend.api_key,
        &mut config.broker.token,
        &mut config.gateway.platform_token,
    ] {
        if secret.is_some() {
            *secret = Some(HIDDEN.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_path_is_in_the_config_dir() {
        assert!(default_path().ends_with(".seedkeeper/config.toml"));
    }

    #[test]
    fn show_never_prints_secrets() {
        let mut config = AppConfig::default();
        config.backend.api_key = Some("sk-ant-secret".into());
        config.gateway.platform_token = Some("discord-secret".into());
        redact(&mut config);
        let shown = toml::to_string_pretty(&config).unwrap();
        assert!(!shown.contains("secret"));
        assert!(shown.contains("[REDACTED]"));
    }
}
