//! # Seedkeeper Core
//!
//! Domain types, traits, and error definitions for the Seedkeeper
//! message-processing pipeline. This crate has no I/O of its own: it defines
//! the model that the broker, memory, prompt, provider, worker, and gateway
//! crates implement against.
//!
//! ## Layout
//!
//! Every external collaborator is a trait here:
//! - [`Broker`]: work queue + key/value with TTL + pub/sub
//! - [`Provider`]: language-model backend
//! - [`Platform`]: the chat platform connection
//!
//! Implementations live in their respective crates so tests can swap in
//! in-process stand-ins.

pub mod broker;
pub mod cache;
pub mod conversation;
pub mod error;
pub mod event;
pub mod platform;
pub mod prompt;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use broker::{Broker, Claim, Subscription};
pub use cache::TtlCache;
pub use conversation::{ConversationKey, ConversationTurn, Role};
pub use error::{Error, Result};
pub use event::{
    GatewayStatus, Heartbeat, HistoryMessage, InboundEvent, OutboundAction, ReplyContext,
    ResponseEnvelope, WorkItem,
};
pub use platform::{Platform, PlatformMessage};
pub use prompt::{LayerKind, PromptLayer, SystemBlock};
pub use provider::{
    ChatMessage, CompletionRequest, CompletionResponse, ModelChoice, Provider, Usage,
};
