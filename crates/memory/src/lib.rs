//! Conversation memory for Seedkeeper.
//!
//! - [`DurableLog`]: one JSON record per user on disk, FIFO-capped
//! - [`TieredMemoryStore`]: durable log + broker-backed medium tier +
//!   in-process cache, read-through with fill-on-miss
//! - [`JsonRecord`]: the atomic JSON record other crates reuse for admins,
//!   bot configuration, and birthdays

pub mod durable;
pub mod locks;
pub mod record;
pub mod settings;
pub mod tiered;

pub use durable::{Appended, DurableLog, DurableStats, MemoryRecord, StoredTurn};
pub use locks::KeyedLocks;
pub use record::{JsonRecord, read_json, write_json_atomic};
pub use settings::MemorySettings;
pub use tiered::{MemoryStatus, TierStats, TieredMemoryStore};
