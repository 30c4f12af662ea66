//! `seedkeeper gateway`: platform connection, against a remote broker.

use crate::runtime;
use anyhow::Context;
use seedkeeper_gateway::Gateway;
use seedkeeper_gateway::health::{self, HealthState};
use std::path::Path;
use tracing::warn;

pub async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = runtime::load_config(config_path)?;
    let platform = seedkeeper_channels::from_config(&config.gateway)
        .context("Platform not configured")?;
    let broker = seedkeeper_broker::connect(&config.broker);

    if !broker.health_check().await.unwrap_or(false) {
        warn!(url = %config.broker.url, "Broker not reachable yet; events are retried once it is");
    }

    let gateway = Gateway::new(config.clone(), platform.clone(), broker);
    let health_addr = format!("{}:{}", config.gateway.health_host, config.gateway.health_port);
    let state = HealthState {
        platform: platform.name().to_string(),
        stats: gateway.stats().clone(),
    };
    tokio::spawn(async move {
        if let Err(e) = health::serve(state, &health_addr).await {
            warn!(addr = %health_addr, error = %e, "Health endpoint unavailable");
        }
    });

    gateway
        .run(runtime::shutdown_signal())
        .await
        .context("Gateway stopped")?;
    Ok(())
}
