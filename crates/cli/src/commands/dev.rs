//! `seedkeeper dev`: broker, console gateway, and one worker in a single
//! process. Type to chat; `exit` or Ctrl+D stops everything.

use crate::runtime;
use seedkeeper_broker::MemoryBroker;
use seedkeeper_channels::ConsolePlatform;
use seedkeeper_gateway::Gateway;
use seedkeeper_worker::{Worker, WorkerContext};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

pub async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let mut config = runtime::load_config(config_path)?;
    config.gateway.platform = "console".into();
    let provider = runtime::provider(&config)?;

    let broker = Arc::new(MemoryBroker::new(config.broker.visibility_timeout()));
    let addr = format!("{}:{}", config.broker.host, config.broker.port);
    {
        let broker = broker.clone();
        let token = config.broker.token.clone();
        let addr = addr.clone();
        tokio::spawn(async move {
            if let Err(e) = seedkeeper_broker::server::serve(broker, token, &addr).await {
                warn!(addr = %addr, error = %e, "Broker service not exposed; running in-process only");
            }
        });
    }

    let platform = Arc::new(ConsolePlatform::new());
    let (stop, shutdown) = watch::channel(false);
    let mut closed = platform.closed();
    let mut interrupted = runtime::shutdown_signal();
    tokio::spawn(async move {
        tokio::select! {
            _ = closed.wait_for(|c| *c) => {}
            _ = interrupted.wait_for(|s| *s) => {}
        }
        let _ = stop.send(true);
    });

    println!("🌱 Seedkeeper dev mode");
    println!("   Broker: in-process (also on http://{addr})");
    println!("   Data:   {}", config.memory.data_dir.display());
    println!("   Type a message, `!commands` for commands, `exit` to leave.\n");

    let gateway = Gateway::new(config.clone(), platform, broker.clone());
    let ctx = WorkerContext::new(config, broker, provider).with_worker_id("worker-dev");
    let worker = tokio::spawn(Worker::new(ctx).run(shutdown.clone()));

    gateway.run(shutdown).await?;
    worker.await?;
    println!("🍃 Goodbye.");
    Ok(())
}
