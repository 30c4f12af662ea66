//! Seedkeeper CLI: the main entry point.
//!
//! Commands:
//! - `broker`       Serve the broker over HTTP
//! - `gateway`      Bridge the chat platform to the broker
//! - `worker`       Consume the work queue
//! - `dev`          Broker, console gateway, and worker in one process
//! - `memory`       Inspect or clear durable conversation memory
//! - `perspectives` Refresh or list the perspective corpus
//! - `config`       Show or write the configuration file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod runtime;

#[derive(Parser)]
#[command(
    name = "seedkeeper",
    about = "Seedkeeper: a queue-backed Discord companion with tiered memory",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "SEEDKEEPER_LOG_JSON")]
    log_json: bool,

    /// Config file (default: ~/.seedkeeper/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the broker over HTTP
    Broker {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run the gateway against a remote broker
    Gateway,

    /// Run a worker against a remote broker
    Worker {
        /// Worker identifier (default: random)
        #[arg(long)]
        id: Option<String>,
    },

    /// Run everything in one process with a console chat
    Dev,

    /// Durable conversation memory
    Memory {
        #[command(subcommand)]
        action: commands::memory::MemoryCommand,
    },

    /// The perspective corpus
    Perspectives {
        #[command(subcommand)]
        action: commands::perspectives::PerspectivesCommand,
    },

    /// Configuration file
    Config {
        #[command(subcommand)]
        action: commands::config_cmd::ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    runtime::init_tracing(cli.verbose, cli.log_json);

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Broker { port } => commands::broker::run(config_path, port).await,
        Commands::Gateway => commands::gateway::run(config_path).await,
        Commands::Worker { id } => commands::worker::run(config_path, id).await,
        Commands::Dev => commands::dev::run(config_path).await,
        Commands::Memory { action } => commands::memory::run(config_path, action).await,
        Commands::Perspectives { action } => commands::perspectives::run(config_path, action).await,
        Commands::Config { action } => commands::config_cmd::run(config_path, action),
    }
}
