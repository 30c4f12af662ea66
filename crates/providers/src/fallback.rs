//! Guarded backend calls.
//!
//! Every call runs under a hard timeout. When a `deep` call fails with a
//! retryable error it is retried exactly once on the economical tier; the
//! second failure goes back to the caller, which answers with a fallback
//! message. There is no retry loop.

use seedkeeper_config::BackendConfig;
use seedkeeper_core::error::ProviderError;
use seedkeeper_core::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, ModelChoice, Provider,
};
use seedkeeper_core::SystemBlock;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// A successful backend call.
#[derive(Debug, Clone)]
pub struct BackendReply {
    pub response: CompletionResponse,
    /// Tier that actually answered
    pub choice: ModelChoice,
    /// Whether the answer came from the economical retry
    pub retried: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BackendStats {
    pub calls: u64,
    pub failures: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub cache_writes: u64,
    pub cache_reads: u64,
}

#[derive(Default)]
struct Counters {
    calls: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    cache_writes: AtomicU64,
    cache_reads: AtomicU64,
}

pub struct BackendCaller {
    provider: Arc<dyn Provider>,
    deep_model: String,
    economical_model: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
    counters: Counters,
}

impl BackendCaller {
    pub fn new(provider: Arc<dyn Provider>, config: &BackendConfig) -> Self {
        Self {
            provider,
            deep_model: config.deep_model.clone(),
            economical_model: config.economical_model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: config.timeout(),
            counters: Counters::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model_for(&self, choice: ModelChoice) -> &str {
        match choice {
            ModelChoice::Deep => &self.deep_model,
            ModelChoice::Economical => &self.economical_model,
        }
    }

    /// A request with the configured token limit and temperature. The model
    /// is filled in by [`call`](Self::call).
    pub fn request(&self, system: Vec<SystemBlock>, messages: Vec<ChatMessage>) -> CompletionRequest {
        CompletionRequest {
            model: String::new(),
            system,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    pub async fn call(
        &self,
        choice: ModelChoice,
        request: CompletionRequest,
    ) -> Result<BackendReply, ProviderError> {
        let first = self.attempt(choice, request.clone()).await;
        let error = match first {
            Ok(response) => {
                return Ok(BackendReply {
                    response,
                    choice,
                    retried: false,
                });
            }
            Err(e) => e,
        };

        if choice != ModelChoice::Deep || !is_retryable(&error) {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
            return Err(error);
        }

        info!(error = %error, "Deep call failed, retrying once on economical tier");
        self.counters.retries.fetch_add(1, Ordering::Relaxed);
        match self.attempt(ModelChoice::Economical, request).await {
            Ok(response) => Ok(BackendReply {
                response,
                choice: ModelChoice::Economical,
                retried: true,
            }),
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn attempt(
        &self,
        choice: ModelChoice,
        mut request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        request.model = self.model_for(choice).to_string();
        self.counters.calls.fetch_add(1, Ordering::Relaxed);

        match tokio::time::timeout(self.timeout, self.provider.complete(request)).await {
            Ok(Ok(response)) => {
                if response.usage.wrote_cache() {
                    self.counters.cache_writes.fetch_add(1, Ordering::Relaxed);
                }
                if response.usage.read_cache() {
                    self.counters.cache_reads.fetch_add(1, Ordering::Relaxed);
                }
                info!(
                    provider = %self.provider.name(),
                    tier = %choice,
                    model = %response.model,
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    cache_write = response.usage.cache_creation_input_tokens,
                    cache_read = response.usage.cache_read_input_tokens,
                    "Backend call complete"
                );
                Ok(response)
            }
            Ok(Err(e)) => {
                warn!(provider = %self.provider.name(), tier = %choice, error = %e, "Backend call failed");
                Err(e)
            }
            Err(_) => {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    provider = %self.provider.name(),
                    tier = %choice,
                    timeout_secs = self.timeout.as_secs(),
                    "Backend call timed out"
                );
                Err(ProviderError::Timeout(format!(
                    "{} tier timed out after {}s",
                    choice,
                    self.timeout.as_secs()
                )))
            }
        }
    }

    pub fn stats(&self) -> BackendStats {
        let c = &self.counters;
        BackendStats {
            calls: c.calls.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            cache_writes: c.cache_writes.load(Ordering::Relaxed),
            cache_reads: c.cache_reads.load(Ordering::Relaxed),
        }
    }
}

/// Bad credentials or missing configuration will fail the same way twice.
fn is_retryable(error: &ProviderError) -> bool {
    !matches!(
        error,
        ProviderError::AuthenticationFailed(_) | ProviderError::NotConfigured(_)
    )
}
