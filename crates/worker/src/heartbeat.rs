//! Worker liveness: a periodic [`Heartbeat`] on the heartbeat channel and a
//! `worker:{id}` registration key that expires if the worker goes quiet.

use crate::context::WorkerContext;
use chrono::Utc;
use seedkeeper_core::broker::{publish_json, set_json};
use seedkeeper_core::error::BrokerError;
use seedkeeper_core::Heartbeat;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub fn registration_key(worker_id: &str) -> String {
    format!("worker:{worker_id}")
}

/// Publish one heartbeat and refresh the registration key.
pub async fn beat(ctx: &WorkerContext) -> Result<Heartbeat, BrokerError> {
    let stats = ctx.stats.snapshot();
    let heartbeat = Heartbeat {
        worker_id: ctx.worker_id.clone(),
        started_at: stats.started_at,
        sent_at: Utc::now(),
        in_flight: stats.in_flight,
        processed: stats.processed,
    };

    set_json(
        ctx.broker.as_ref(),
        &registration_key(&ctx.worker_id),
        &heartbeat,
        Some(Duration::from_secs(ctx.config.worker.heartbeat_ttl_secs)),
    )
    .await?;
    publish_json(
        ctx.broker.as_ref(),
        &ctx.config.broker.heartbeat_channel,
        &heartbeat,
    )
    .await?;

    debug!(
        worker_id = %heartbeat.worker_id,
        in_flight = heartbeat.in_flight,
        processed = heartbeat.processed,
        "Heartbeat"
    );
    Ok(heartbeat)
}

/// Beat every `heartbeat_interval_secs` until shutdown, then deregister.
pub async fn run(ctx: Arc<WorkerContext>, mut shutdown: watch::Receiver<bool>) {
    let period = Duration::from_secs(ctx.config.worker.heartbeat_interval_secs.max(1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        if let Err(e) = beat(&ctx).await {
            warn!(worker_id = %ctx.worker_id, error = %e, "Heartbeat failed");
        }
    }

    match ctx.broker.delete(&registration_key(&ctx.worker_id)).await {
        Ok(_) => info!(worker_id = %ctx.worker_id, "Worker deregistered"),
        Err(e) => warn!(worker_id = %ctx.worker_id, error = %e, "Deregistration failed; key expires by TTL"),
    }
}
