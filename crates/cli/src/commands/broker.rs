//! `seedkeeper broker`: the in-memory broker served over HTTP.

use crate::runtime;
use anyhow::Context;
use seedkeeper_broker::MemoryBroker;
use std::path::Path;
use std::sync::Arc;

pub async fn run(config_path: Option<&Path>, port: Option<u16>) -> anyhow::Result<()> {
    let config = runtime::load_config(config_path)?;
    let port = port.unwrap_or(config.broker.port);
    let addr = format!("{}:{port}", config.broker.host);

    println!("🌱 Seedkeeper broker");
    println!("   Listening: {addr}");
    println!("   Work queue: {}", config.broker.work_queue);
    println!("   Responses:  {}", config.broker.response_channel);

    let broker = Arc::new(MemoryBroker::new(config.broker.visibility_timeout()));
    let mut shutdown = runtime::shutdown_signal();
    tokio::select! {
        served = seedkeeper_broker::server::serve(broker, config.broker.token.clone(), &addr) => {
            served.with_context(|| format!("Broker service failed on {addr}"))?;
        }
        _ = shutdown.changed() => {}
    }
    Ok(())
}
