//! Anthropic Messages API client.
//!
//! - `x-api-key` header authentication and the `anthropic-version` header
//! - System prompt sent as a list of text blocks; blocks that end a reusable
//!   prefix carry `cache_control: {type: ephemeral}`
//! - Usage includes prompt-cache creation and read counts

use async_trait::async_trait;
use seedkeeper_config::BackendConfig;
use seedkeeper_core::error::ProviderError;
use seedkeeper_core::provider::{CompletionRequest, CompletionResponse, Provider, Usage};
use seedkeeper_core::{Role, SystemBlock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

pub struct AnthropicProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from the `[backend]` config section. The hard per-call timeout
    /// is enforced by the caller, not the HTTP client.
    pub fn from_config(config: &BackendConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProviderError::NotConfigured("ANTHROPIC_API_KEY is not set".into()))?;
        Ok(Self::new(api_key).with_base_url(&config.base_url))
    }

    /// Custom base URL (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request_body(request: &CompletionRequest) -> ApiRequest<'_> {
        ApiRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.system.iter().map(ApiSystemBlock::from).collect(),
            messages: request
                .messages
                .iter()
                .map(|m| ApiMessage {
                    role: match m.role {
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    content: &m.content,
                })
                .collect(),
        }
    }

    fn into_response(resp: ApiResponse) -> Result<CompletionResponse, ProviderError> {
        let text: Vec<String> = resp
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseBlock::Text { text } => Some(text),
                ResponseBlock::Other => None,
            })
            .collect();
        if text.is_empty() {
            return Err(ProviderError::MalformedResponse(
                "response contained no text blocks".into(),
            ));
        }

        Ok(CompletionResponse {
            text: text.join("\n"),
            model: resp.model,
            usage: Usage {
                input_tokens: resp.usage.input_tokens,
                output_tokens: resp.usage.output_tokens,
                cache_creation_input_tokens: resp.usage.cache_creation_input_tokens.unwrap_or(0),
                cache_read_input_tokens: resp.usage.cache_read_input_tokens.unwrap_or(0),
            },
            stop_reason: resp.stop_reason,
        })
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::request_body(&request);

        debug!(
            provider = "anthropic",
            model = %request.model,
            system_blocks = body.system.len(),
            messages = body.messages.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid Anthropic API key".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_resp: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(format!("Anthropic response: {e}")))?;

        let result = Self::into_response(api_resp)?;
        debug!(
            model = %result.model,
            input_tokens = result.usage.input_tokens,
            output_tokens = result.usage.output_tokens,
            cache_write = result.usage.cache_creation_input_tokens,
            cache_read = result.usage.cache_read_input_tokens,
            "Completion received"
        );
        Ok(result)
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    system: Vec<ApiSystemBlock<'a>>,
    messages: Vec<ApiMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ApiSystemBlock<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

impl<'a> From<&'a SystemBlock> for ApiSystemBlock<'a> {
    fn from(block: &'a SystemBlock) -> Self {
        Self {
            kind: "text",
            text: &block.text,
            cache_control: block.cache.then_some(CacheControl { kind: "ephemeral" }),
        }
    }
}

#[derive(Debug, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    content: Vec<ResponseBlock>,
    usage: ApiUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
    #[serde(default)]
    cache_creation_input_tokens: Option<u32>,
    #[serde(default)]
    cache_read_input_tokens: Option<u32>,
}
