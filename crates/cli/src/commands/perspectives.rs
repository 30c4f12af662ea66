//! `seedkeeper perspectives`: refresh or list the corpus.

use crate::runtime;
use clap::Subcommand;
use seedkeeper_prompt::{PerspectiveStore, Tier};
use std::path::Path;

#[derive(Subcommand)]
pub enum PerspectivesCommand {
    /// Download the corpus and replace the local cache
    Refresh {
        /// Source URL (default: `perspectives.source_url`)
        #[arg(long)]
        url: Option<String>,
    },
    /// List the cached perspectives
    List {
        /// Only the curated core
        #[arg(long)]
        core: bool,
    },
}

pub async fn run(config_path: Option<&Path>, action: PerspectivesCommand) -> anyhow::Result<()> {
    let config = runtime::load_config(config_path)?;
    let store = PerspectiveStore::new(config.perspectives.core.clone());
    let cache_file = &config.perspectives.cache_file;

    match action {
        PerspectivesCommand::Refresh { url } => {
            let url = url.unwrap_or_else(|| config.perspectives.source_url.clone());
            println!("🔄 Fetching perspectives from {url}");
            let count = store.refresh(&url, cache_file).await?;
            let stats = store.stats();
            println!("   ✅ {count} perspectives ({} core, {} extended)", stats.core, stats.extended);
            println!("   Cached at {}", cache_file.display());
        }
        PerspectivesCommand::List { core } => {
            let count = store.load_file(cache_file)?;
            if count == 0 {
                println!("No perspectives cached at {}.", cache_file.display());
                println!("Run `seedkeeper perspectives refresh` first.");
                return Ok(());
            }
            let set = store.snapshot();
            for fragment in set.all() {
                if core && fragment.tier != Tier::Core {
                    continue;
                }
                let marker = if fragment.tier == Tier::Core { "★" } else { " " };
                println!("{marker} {:<40} {:>6} chars", fragment.name, fragment.body.chars().count());
            }
            let stats = store.stats();
            println!("\n{} perspectives ({} core, {} extended)", stats.total, stats.core, stats.extended);
        }
    }
    Ok(())
}
