//! `seedkeeper memory`: inspect or clear the durable tier offline.

use crate::runtime;
use clap::Subcommand;
use seedkeeper_broker::MemoryBroker;
use seedkeeper_memory::TieredMemoryStore;
use std::path::Path;
use std::sync::Arc;

#[derive(Subcommand)]
pub enum MemoryCommand {
    /// Totals, or one user's record
    Status {
        /// Platform user id
        user: Option<String>,
    },
    /// Forget everything remembered about a user
    Clear {
        /// Platform user id
        user: String,
    },
}

pub async fn run(config_path: Option<&Path>, action: MemoryCommand) -> anyhow::Result<()> {
    let config = runtime::load_config(config_path)?;

    match action {
        MemoryCommand::Status { user: None } => {
            let store = TieredMemoryStore::new(&config.memory, Arc::new(MemoryBroker::default()));
            let stats = store.durable_stats()?;
            println!("🧠 Memory");
            println!("   Directory: {}", store.durable().dir().display());
            println!("   Users:     {}", stats.users);
            println!("   Turns:     {}", stats.turns);
            println!("   Cap:       {} turns per user", store.durable().cap());
        }
        MemoryCommand::Status { user: Some(user) } => {
            let store = TieredMemoryStore::new(&config.memory, Arc::new(MemoryBroker::default()));
            let status = store.status(&user).await?;
            println!("🧠 Memory for {user}");
            println!("   Recording:     {}", if status.enabled { "on" } else { "off" });
            println!("   Turns:         {} ({} direct, {} channel)", status.total_turns, status.dm_turns, status.channel_turns);
            println!("   Conversations: {}", status.conversations);
            if let (Some(oldest), Some(newest)) = (status.oldest, status.newest) {
                println!(
                    "   Span:          {} to {}",
                    oldest.format("%Y-%m-%d %H:%M"),
                    newest.format("%Y-%m-%d %H:%M")
                );
            }
        }
        MemoryCommand::Clear { user } => {
            // The broker's copy is cleared too when it is reachable; otherwise
            // it expires by TTL.
            let store = TieredMemoryStore::new(&config.memory, seedkeeper_broker::connect(&config.broker));
            store.clear(&user).await?;
            println!("🌱 Memory cleared for {user}");
        }
    }
    Ok(())
}
