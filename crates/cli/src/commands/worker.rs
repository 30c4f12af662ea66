//! `seedkeeper worker`: one queue consumer, against a remote broker.

use crate::runtime;
use seedkeeper_worker::{Worker, WorkerContext};
use std::path::Path;
use tracing::warn;

pub async fn run(config_path: Option<&Path>, id: Option<String>) -> anyhow::Result<()> {
    let config = runtime::load_config(config_path)?;
    let provider = runtime::provider(&config)?;
    let broker = seedkeeper_broker::connect(&config.broker);

    if !broker.health_check().await.unwrap_or(false) {
        warn!(url = %config.broker.url, "Broker not reachable yet; claims are retried with backoff");
    }

    let mut ctx = WorkerContext::new(config, broker, provider);
    if let Some(id) = id {
        ctx = ctx.with_worker_id(id);
    }
    Worker::new(ctx).run(runtime::shutdown_signal()).await;
    Ok(())
}
