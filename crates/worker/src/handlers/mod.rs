//! The standard command set.
//!
//! [`registry`] lists the handler constructors in table order; `!commands`
//! shows them in that order too.

pub mod admin;
pub mod birthday;
pub mod catchup;
pub mod commands;
pub mod config;
pub mod conversation;
pub mod garden;
pub mod memory;
pub mod reload;
pub mod status;

use crate::context::WorkerContext;
use crate::handler::Invocation;
use crate::table::HandlerRegistry;
use seedkeeper_core::error::ProviderError;
use seedkeeper_core::ModelChoice;
use seedkeeper_prompt::{CompileInput, SelectMode};
use tracing::debug;

pub fn registry() -> HandlerRegistry {
    HandlerRegistry::new(
        vec![
            catchup::factory,
            garden::hello,
            garden::about,
            garden::seeds,
            garden::tend,
            garden::seasons,
            garden::garden,
            memory::factory,
            memory::forget_me,
            birthday::factory,
            admin::factory,
            config::factory,
            reload::factory,
            status::status,
            status::health,
            commands::factory,
        ],
        conversation::factory,
        commands::unknown,
    )
}

/// Knobs for a one-shot backend prompt.
pub(crate) struct Ask<'a> {
    pub prompt: &'a str,
    pub mode: SelectMode,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl<'a> Ask<'a> {
    pub fn new(prompt: &'a str) -> Self {
        Self {
            prompt,
            mode: SelectMode::Core,
            max_tokens: 600,
            temperature: None,
        }
    }
}

/// Compile `ask.prompt` against the voice and perspectives, show typing, and
/// return the trimmed reply text. An empty reply is an error so callers fall
/// back to their own text.
pub(crate) async fn ask_backend(
    ctx: &WorkerContext,
    inv: &Invocation,
    choice: ModelChoice,
    ask: Ask<'_>,
) -> Result<String, ProviderError> {
    let compiled = ctx.compiler.compile(&CompileInput {
        mode: ask.mode,
        channel_topic: inv.event.channel_topic.as_deref(),
        author_name: Some(inv.author_name()),
        ..CompileInput::new(ask.prompt)
    });

    let mut request = ctx
        .backend
        .request(compiled.system_blocks(), compiled.messages.clone());
    request.max_tokens = ask.max_tokens;
    if let Some(temperature) = ask.temperature {
        request.temperature = temperature;
    }

    ctx.typing(inv).await;
    let reply = ctx.call_backend(inv, choice, request).await?;
    debug!(
        command = inv.command.as_deref().unwrap_or("conversation"),
        model = %reply.response.model,
        retried = reply.retried,
        cache_read = reply.response.usage.read_cache(),
        "Backend answered"
    );

    let text = reply.response.text.trim();
    if text.is_empty() {
        return Err(ProviderError::MalformedResponse("empty reply".into()));
    }
    Ok(text.to_string())
}

/// The first `max` characters of `text`, with an ellipsis when cut.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// First word of `args`, lowercased, and the trimmed rest.
pub(crate) fn split_subcommand(args: &str) -> (String, &str) {
    let args = args.trim();
    match args.split_once(char::is_whitespace) {
        Some((first, rest)) => (first.to_lowercase(), rest.trim()),
        None => (args.to_lowercase(), ""),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! A worker context over an in-process broker and a scripted backend.

    use crate::context::WorkerContext;
    use crate::handler::Invocation;
    use async_trait::async_trait;
    use chrono::Utc;
    use seedkeeper_broker::MemoryBroker;
    use seedkeeper_config::AppConfig;
    use seedkeeper_core::error::ProviderError;
    use seedkeeper_core::{
        Broker, CompletionRequest, CompletionResponse, InboundEvent, Provider, Usage,
    };
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    pub struct MockProvider {
        pub reply: Mutex<Result<String, ProviderError>>,
        pub calls: Mutex<usize>,
        pub requests: Mutex<Vec<CompletionRequest>>,
    }

    impl MockProvider {
        pub fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(Ok(text.to_string())),
                calls: Mutex::new(0),
                requests: Mutex::new(Vec::new()),
            })
        }

        pub fn failing(error: ProviderError) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(Err(error)),
                calls: Mutex::new(0),
                requests: Mutex::new(Vec::new()),
            })
        }

        pub fn call_count(&self) -> usize {
            *self.calls.lock().unwrap()
        }

        pub fn last_request(&self) -> Option<CompletionRequest> {
            self.requests.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            let model = request.model.clone();
            self.requests.lock().unwrap().push(request);
            let reply = self.reply.lock().unwrap().clone();
            reply.map(|text| CompletionResponse {
                text,
                model,
                usage: Usage::default(),
                stop_reason: Some("end_turn".into()),
            })
        }
    }

    pub struct Harness {
        pub ctx: Arc<WorkerContext>,
        pub broker: Arc<MemoryBroker>,
        pub provider: Arc<MockProvider>,
        pub _dir: TempDir,
    }

    pub fn config(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.memory.data_dir = dir.path().to_path_buf();
        config.perspectives.cache_file = dir.path().join("perspectives.txt");
        config.admins.bootstrap = vec!["900".into()];
        config.worker.fetch_timeout_secs = 2;
        config
    }

    pub fn harness_with(provider: Arc<MockProvider>, tweak: impl FnOnce(&mut AppConfig)) -> Harness {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        tweak(&mut config);
        let broker = Arc::new(MemoryBroker::default());
        let ctx = WorkerContext::new(config, broker.clone() as Arc<dyn Broker>, provider.clone())
            .with_worker_id("worker-test");
        Harness {
            ctx: Arc::new(ctx),
            broker,
            provider,
            _dir: dir,
        }
    }

    pub fn harness(provider: Arc<MockProvider>) -> Harness {
        harness_with(provider, |_| {})
    }

    pub fn event(author: &str, text: &str, dm: bool) -> InboundEvent {
        InboundEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            channel_id: if dm { "dm-1".into() } else { "chan-1".into() },
            guild_id: if dm { None } else { Some("111".into()) },
            author_id: author.into(),
            author_name: Some(format!("user{author}")),
            is_direct_message: dm,
            mentions_bot: false,
            raw_text: text.into(),
            timestamp: Utc::now(),
            reply_context: None,
            channel_topic: None,
        }
    }

    pub fn invocation(command: &str, args: &str, author: &str, is_admin: bool) -> Invocation {
        Invocation {
            correlation_id: "corr-1".into(),
            event: event(author, &format!("!{command} {args}"), false),
            command: Some(command.into()),
            args: args.into(),
            is_admin,
        }
    }
}
