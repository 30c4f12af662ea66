//! Provider trait: the abstraction over the language-model backend.
//!
//! A Provider sends a compiled prompt (system blocks plus chat messages) to
//! a model and returns the complete response. Model selection happens
//! before this call, in the router.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::conversation::Role;
use crate::error::ProviderError;
use crate::prompt::SystemBlock;

/// Backend tier chosen per request. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelChoice {
    /// Fast, cheap model for short and simple requests
    Economical,
    /// Slower, more capable model
    Deep,
}

impl std::fmt::Display for ModelChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Economical => write!(f, "economical"),
            Self::Deep => write!(f, "deep"),
        }
    }
}

/// A chat message sent after the system blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A single completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Concrete model id (e.g. "claude-haiku-4-5-20251001")
    pub model: String,

    pub system: Vec<SystemBlock>,

    pub messages: Vec<ChatMessage>,

    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    1.0
}

/// Token usage, including prompt-cache accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default)]
    pub cache_creation_input_tokens: u32,
    #[serde(default)]
    pub cache_read_input_tokens: u32,
}

impl Usage {
    /// Whether this call wrote the cached prefix.
    pub fn wrote_cache(&self) -> bool {
        self.cache_creation_input_tokens > 0
    }

    /// Whether this call reused a cached prefix.
    pub fn read_cache(&self) -> bool {
        self.cache_read_input_tokens > 0
    }
}

/// A complete response from the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub text: String,

    /// Which model actually responded
    pub model: String,

    pub usage: Usage,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// The core Provider trait.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ProviderError>;

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_cache_classes() {
        let write = Usage {
            cache_creation_input_tokens: 12_000,
            ..Usage::default()
        };
        let read = Usage {
            cache_read_input_tokens: 12_000,
            ..Usage::default()
        };
        assert!(write.wrote_cache() && !write.read_cache());
        assert!(read.read_cache() && !read.wrote_cache());
    }

    #[test]
    fn model_choice_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ModelChoice::Deep).unwrap(), "\"deep\"");
        assert_eq!(ModelChoice::Economical.to_string(), "economical");
    }
}
