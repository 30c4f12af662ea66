//! End-to-end tests for the Seedkeeper pipeline.
//!
//! A stub Discord connection feeds the gateway, an in-process broker carries
//! work and responses, and real workers answer through a scripted backend.

use async_trait::async_trait;
use chrono::Utc;
use seedkeeper_broker::MemoryBroker;
use seedkeeper_channels::{DiscordConfig, DiscordPlatform};
use seedkeeper_config::AppConfig;
use seedkeeper_core::error::ProviderError;
use seedkeeper_core::provider::{CompletionRequest, CompletionResponse, Provider, Usage};
use seedkeeper_core::{Broker, PlatformMessage};
use seedkeeper_gateway::Gateway;
use seedkeeper_worker::{Worker, WorkerContext};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

// ── Scripted backend ─────────────────────────────────────────────────────

/// Answers every request with `reply`, and reports a cache write the first
/// time it sees a system prefix and a cache read afterwards.
struct CachingProvider {
    reply: String,
    seen_prefixes: Mutex<HashSet<String>>,
    call_count: Mutex<usize>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl CachingProvider {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.into(),
            seen_prefixes: Mutex::new(HashSet::new()),
            call_count: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait]
impl Provider for CachingProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        *self.call_count.lock().unwrap() += 1;
        let prefix = request
            .system
            .iter()
            .find(|b| b.cache)
            .map(|b| b.text.clone())
            .unwrap_or_default();
        let first_time = self.seen_prefixes.lock().unwrap().insert(prefix);
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);

        Ok(CompletionResponse {
            text: self.reply.clone(),
            model,
            usage: Usage {
                input_tokens: 1200,
                output_tokens: 40,
                cache_creation_input_tokens: if first_time { 1000 } else { 0 },
                cache_read_input_tokens: if first_time { 0 } else { 1000 },
            },
            stop_reason: Some("end_turn".into()),
        })
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

struct Pipeline {
    platform: Arc<DiscordPlatform>,
    broker: Arc<MemoryBroker>,
    provider: Arc<CachingProvider>,
    workers: Vec<Arc<WorkerContext>>,
    stop: watch::Sender<bool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    _dir: TempDir,
}

fn config(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.memory.data_dir = dir.path().to_path_buf();
    config.perspectives.cache_file = dir.path().join("views.txt");
    config.admins.bootstrap = vec!["900".into()];
    config.worker.fetch_timeout_secs = 5;
    config.gateway.reconnect_initial_ms = 10;
    config.gateway.reconnect_max_ms = 50;
    config
}

async fn start(worker_count: usize) -> Pipeline {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let platform = Arc::new(DiscordPlatform::new(DiscordConfig::new("test-token")));
    let broker = Arc::new(MemoryBroker::default());
    let provider = CachingProvider::new("🌱 Hello, friend. The garden is glad you're here.");
    let (stop, shutdown) = watch::channel(false);
    let mut tasks = Vec::new();
    let mut workers = Vec::new();

    let gateway = Gateway::new(config.clone(), platform.clone(), broker.clone());
    let gateway_shutdown = shutdown.clone();
    tasks.push(tokio::spawn(async move {
        gateway.run(gateway_shutdown).await.unwrap();
    }));

    for n in 0..worker_count {
        let ctx = WorkerContext::new(config.clone(), broker.clone(), provider.clone())
            .with_worker_id(format!("worker-{n}"));
        let worker = Worker::new(ctx);
        workers.push(worker.context().clone());
        tasks.push(tokio::spawn(worker.run(shutdown.clone())));
    }

    for _ in 0..200 {
        if platform.is_connected().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    // Let the gateway subscribe to responses.
    tokio::time::sleep(Duration::from_millis(50)).await;

    Pipeline {
        platform,
        broker,
        provider,
        workers,
        stop,
        tasks,
        _dir: dir,
    }
}

impl Pipeline {
    async fn say(&self, msg: PlatformMessage) {
        self.platform.inject_message(msg).await.unwrap();
    }

    async fn replies(&self, count: usize) -> Vec<String> {
        for _ in 0..1000 {
            let sent = self.platform.sent_messages();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {count} replies, got {:?}",
            self.platform.sent_messages()
        );
    }

    async fn shutdown(self) {
        self.stop.send(true).unwrap();
        for task in self.tasks {
            task.await.unwrap();
        }
    }
}

fn dm(id: &str, author: &str, text: &str) -> PlatformMessage {
    PlatformMessage {
        message_id: id.into(),
        channel_id: format!("dm-{author}"),
        guild_id: None,
        author_id: author.into(),
        author_name: Some(format!("user{author}")),
        author_is_bot: false,
        is_direct_message: true,
        mentions_bot: false,
        content: text.into(),
        channel_topic: None,
        reply_to: None,
        timestamp: Utc::now(),
    }
}

fn in_channel(id: &str, author: &str, text: &str) -> PlatformMessage {
    PlatformMessage {
        channel_id: "555".into(),
        guild_id: Some("111".into()),
        is_direct_message: false,
        ..dm(id, author, text)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn direct_message_round_trip() {
    let pipeline = start(1).await;

    pipeline.say(dm("1001", "42", "the roses bloomed today")).await;
    let replies = pipeline.replies(1).await;

    assert_eq!(replies, vec!["🌱 Hello, friend. The garden is glad you're here.".to_string()]);
    assert_eq!(pipeline.provider.calls(), 1);
    let request = pipeline.provider.requests.lock().unwrap()[0].clone();
    assert_eq!(request.messages.last().unwrap().content, "the roses bloomed today");
    assert_eq!(request.model, AppConfig::default().backend.economical_model);

    // The exchange is remembered for the next message.
    let ctx = &pipeline.workers[0];
    let status = ctx.memory.status("42").await.unwrap();
    assert_eq!(status.total_turns, 2);
    assert_eq!(status.dm_turns, 2);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn a_bare_greeting_is_answered_by_hello() {
    let pipeline = start(1).await;

    pipeline.say(dm("1101", "42", "hi")).await;
    let replies = pipeline.replies(1).await;

    assert_eq!(replies.len(), 1);
    assert!(replies[0].ends_with("🌱 Hello, friend. The garden is glad you're here."));
    assert_eq!(pipeline.provider.calls(), 1);
    let request = pipeline.provider.requests.lock().unwrap()[0].clone();
    assert_eq!(request.model, AppConfig::default().backend.economical_model);

    let usage = pipeline.workers[0].usage.snapshot().unwrap();
    assert_eq!(usage.commands["hello"].calls, 1);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn second_channel_message_reuses_the_cached_prefix() {
    let pipeline = start(1).await;

    let mention = |id: &str, text: &str| PlatformMessage {
        mentions_bot: true,
        ..in_channel(id, "42", text)
    };
    pipeline.say(mention("2001", "good morning")).await;
    pipeline.replies(1).await;
    pipeline.say(mention("2002", "how are the seedlings?")).await;
    pipeline.replies(2).await;

    let stats = pipeline.workers[0].backend.stats();
    assert_eq!(stats.calls, 2);
    assert_eq!(stats.cache_writes, 1);
    assert_eq!(stats.cache_reads, 1);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn channel_chatter_gets_no_reply() {
    let pipeline = start(1).await;

    pipeline.say(in_channel("3001", "42", "just talking among ourselves")).await;
    pipeline.say(in_channel("3002", "43", "!health")).await;
    let replies = pipeline.replies(1).await;

    assert_eq!(replies.len(), 1);
    assert!(replies[0].starts_with("🌱 **Seedkeeper Health Status**"));
    assert_eq!(pipeline.provider.calls(), 0);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn catchup_fetches_history_through_the_gateway() {
    let pipeline = start(1).await;

    pipeline.say(in_channel("4001", "42", "shall we plant tomatoes?")).await;
    pipeline.say(in_channel("4002", "43", "only after the last frost")).await;
    pipeline.say(in_channel("4003", "44", "agreed, mid-May then")).await;
    pipeline
        .say(in_channel(
            "4004",
            "45",
            "!catchup https://discord.com/channels/111/555/4001 planting",
        ))
        .await;

    let replies = pipeline.replies(1).await;
    let summary = &replies[0];
    assert!(summary.starts_with("🌱 **Conversation Catchup**"));
    assert!(summary.contains("*Focusing on: planting*"));
    assert!(summary.contains("*Caught up on 3 messages* 🍃"));

    let request = pipeline.provider.requests.lock().unwrap()[0].clone();
    let transcript = &request.messages.last().unwrap().content;
    assert!(transcript.contains("only after the last frost"));

    pipeline.shutdown().await;
}

#[tokio::test]
async fn memory_clear_empties_every_tier() {
    let pipeline = start(1).await;

    pipeline.say(dm("5001", "42", "remember the roses")).await;
    pipeline.replies(1).await;
    pipeline.say(dm("5002", "42", "!memory clear")).await;
    let replies = pipeline.replies(2).await;
    assert_eq!(replies[1], "🌱 Memory cleared. Starting fresh!");

    let ctx = &pipeline.workers[0];
    assert_eq!(ctx.memory.status("42").await.unwrap().total_turns, 0);
    let key = seedkeeper_core::ConversationKey::direct("dm-42");
    assert!(ctx.memory.read("42", &key).await.unwrap().is_empty());
    assert!(
        pipeline
            .broker
            .get(&key.storage_key("42", "medium"))
            .await
            .unwrap()
            .is_none()
    );

    pipeline.shutdown().await;
}

#[tokio::test]
async fn two_workers_answer_each_message_once() {
    let pipeline = start(2).await;

    for n in 0..6 {
        let author = format!("{}", 60 + n);
        pipeline.say(dm(&format!("600{n}"), &author, "hello there")).await;
    }
    pipeline.replies(6).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(pipeline.platform.sent_messages().len(), 6);
    assert_eq!(pipeline.provider.calls(), 6);
    let processed: u64 = pipeline
        .workers
        .iter()
        .map(|w| w.stats.snapshot().processed)
        .sum();
    assert_eq!(processed, 6);

    pipeline.shutdown().await;
}
