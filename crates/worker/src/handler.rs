//! The uniform handler interface.
//!
//! Every command, the free-form conversation handler, and the unknown-command
//! reply implement [`CommandHandler`]. A handler gets the event and the
//! worker's [`WorkerContext`] and returns a [`Reply`]; it never talks to the
//! platform except through actions published on the context.

use crate::context::WorkerContext;
use crate::rate_limit::RateClass;
use async_trait::async_trait;
use seedkeeper_core::{InboundEvent, ModelChoice, Result};
use std::fmt;

/// Grouping used by `!commands`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Category {
    General,
    Garden,
    Birthdays,
    Memory,
    Keepers,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::General => "General",
            Self::Garden => "Garden Wisdom",
            Self::Birthdays => "Birthdays",
            Self::Memory => "Memory",
            Self::Keepers => "Garden Keepers",
        };
        f.write_str(label)
    }
}

/// Static facts about a handler, read by the dispatcher before it runs.
#[derive(Debug, Clone)]
pub struct HandlerDescriptor {
    /// Command token without the marker, lowercase
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub usage: &'static str,
    pub summary: &'static str,
    pub category: Category,
    /// Non-keepers get the authorization denial instead
    pub admin_only: bool,
    pub rate_class: Option<RateClass>,
    /// Forced backend tier, overriding the router heuristics
    pub route: Option<ModelChoice>,
    /// Listed by `!commands`
    pub listed: bool,
}

impl HandlerDescriptor {
    pub const fn new(name: &'static str, category: Category) -> Self {
        Self {
            name,
            aliases: &[],
            usage: "",
            summary: "",
            category,
            admin_only: false,
            rate_class: None,
            route: None,
            listed: true,
        }
    }

    pub fn matches(&self, token: &str) -> bool {
        self.name == token || self.aliases.contains(&token)
    }
}

/// One resolved event, as a handler sees it.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub correlation_id: String,
    pub event: InboundEvent,
    /// The resolved command name; `None` for free-form conversation
    pub command: Option<String>,
    /// Text after the command token, or the whole message for conversation
    pub args: String,
    pub is_admin: bool,
}

impl Invocation {
    pub fn author_id(&self) -> &str {
        &self.event.author_id
    }

    pub fn channel_id(&self) -> &str {
        &self.event.channel_id
    }

    pub fn author_name(&self) -> &str {
        self.event
            .author_name
            .as_deref()
            .unwrap_or(&self.event.author_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    /// Everything the handler had to say was already published
    Silent,
}

impl Reply {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn descriptor(&self) -> &HandlerDescriptor;

    async fn handle(&self, inv: &Invocation, ctx: &WorkerContext) -> Result<Reply>;
}
