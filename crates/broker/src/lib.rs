//! Broker implementations for Seedkeeper.
//!
//! - [`MemoryBroker`]: the broker contract implemented in-process. Used
//!   directly by tests and `seedkeeper dev`, and as the backing store of
//!   the broker service.
//! - [`server`]: serves any [`Broker`](seedkeeper_core::Broker) over
//!   authenticated HTTP, with pub/sub as server-sent events.
//! - [`RemoteBroker`]: the client the Gateway and Worker processes use to
//!   reach that service.

pub mod memory;
pub mod remote;
pub mod server;

pub use memory::MemoryBroker;
pub use remote::RemoteBroker;
pub use server::{BrokerService, build_router};

use seedkeeper_config::BrokerConfig;
use seedkeeper_core::Broker;
use std::sync::Arc;

/// Build the broker client described by `config`.
pub fn connect(config: &BrokerConfig) -> Arc<dyn Broker> {
    Arc::new(RemoteBroker::new(&config.url, config.token.clone()))
}
