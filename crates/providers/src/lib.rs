//! Language-model backend access for Seedkeeper.
//!
//! [`AnthropicProvider`] implements `seedkeeper_core::Provider` against the
//! Messages API. [`ModelRouter`] picks a tier from request metadata and
//! [`BackendCaller`] makes the guarded call: a hard timeout and at most one
//! retry on the economical tier.

pub mod anthropic;
pub mod fallback;
pub mod router;

pub use anthropic::AnthropicProvider;
pub use fallback::{BackendCaller, BackendReply, BackendStats};
pub use router::{ModelRouter, RouteRequest};
