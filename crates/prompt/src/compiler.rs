//! Layered prompt compilation.
//!
//! Assembles the system prompt from eight layers, heaviest and most stable
//! first:
//!
//! 1. **Invocation**: opening words, stable
//! 2. **Core context**: who and where the bot is, stable
//! 3. **Core perspectives**: the curated corpus subset, stable
//! 4. **Perspectives**: extended fragments, resampled per compilation
//! 5. **Team letters**: optional
//! 6. **Background**: channel topic, user context, older history
//! 7. **Foreground**: recent turns and the current message
//! 8. **Benediction**: closing words
//!
//! Layers 1-3 form the cached prefix: the last of them carries the cache
//! boundary and their text is byte-identical between compilations as long as
//! the corpus and voice are unchanged. Nothing after the boundary is ever
//! marked.

use crate::perspectives::{PerspectiveFragment, PerspectiveStore, SelectMode};
use crate::token;
use crate::voice::Voice;
use seedkeeper_core::prompt::system_blocks;
use seedkeeper_core::{ChatMessage, ConversationTurn, LayerKind, PromptLayer, Role, SystemBlock};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Turns rendered verbatim in the foreground; older ones are summarized.
pub const FOREGROUND_TURNS: usize = 6;

/// Older turns are shortened to this many characters in the background.
const SUMMARY_CHARS: usize = 200;

const BOT_NAME: &str = "Seedkeeper";

/// Everything that varies per request.
#[derive(Debug, Clone)]
pub struct CompileInput<'a> {
    pub mode: SelectMode,
    pub channel_topic: Option<&'a str>,
    pub user_context: Option<&'a str>,
    pub community_patterns: Option<&'a str>,
    /// Remembered turns of this conversation, oldest first
    pub history: &'a [ConversationTurn],
    /// The message being answered
    pub message: &'a str,
    pub author_name: Option<&'a str>,
}

impl<'a> CompileInput<'a> {
    pub fn new(message: &'a str) -> Self {
        Self {
            mode: SelectMode::Core,
            channel_topic: None,
            user_context: None,
            community_patterns: None,
            history: &[],
            message,
            author_name: None,
        }
    }
}

/// Token estimate for one layer.
#[derive(Debug, Clone, Serialize)]
pub struct LayerStats {
    pub kind: LayerKind,
    pub tokens: usize,
    pub cached: bool,
}

/// A compiled prompt, ready for a backend call.
#[derive(Debug, Clone)]
pub struct CompiledPrompt {
    pub layers: Vec<PromptLayer>,
    pub messages: Vec<ChatMessage>,
    pub stats: Vec<LayerStats>,
    pub total_tokens: usize,
}

impl CompiledPrompt {
    pub fn system_blocks(&self) -> Vec<SystemBlock> {
        system_blocks(&self.layers)
    }

    pub fn layer(&self, kind: LayerKind) -> Option<&PromptLayer> {
        self.layers.iter().find(|l| l.kind == kind)
    }

    /// The whole system prompt as one string.
    pub fn render(&self) -> String {
        self.layers
            .iter()
            .map(|l| l.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Estimated tokens in the cached prefix.
    pub fn cached_tokens(&self) -> usize {
        self.stats.iter().filter(|s| s.cached).map(|s| s.tokens).sum()
    }
}

pub struct PromptCompiler {
    perspectives: Arc<PerspectiveStore>,
    voice: RwLock<Arc<Voice>>,
}

impl PromptCompiler {
    pub fn new(perspectives: Arc<PerspectiveStore>, voice: Voice) -> Self {
        Self {
            perspectives,
            voice: RwLock::new(Arc::new(voice)),
        }
    }

    pub fn perspectives(&self) -> &Arc<PerspectiveStore> {
        &self.perspectives
    }

    pub fn voice(&self) -> Arc<Voice> {
        self.voice.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Re-read voice assets. Compilations already running keep the old ones.
    pub fn reload_voice(&self, data_dir: &Path) {
        let voice = Voice::load(data_dir);
        *self.voice.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(voice);
        debug!(data_dir = %data_dir.display(), "Voice assets reloaded");
    }

    pub fn compile(&self, input: &CompileInput<'_>) -> CompiledPrompt {
        let voice = self.voice();
        let selection = self.perspectives.select(input.mode);
        let mut layers: Vec<PromptLayer> = Vec::with_capacity(8);

        layers.push(layer(LayerKind::Invocation, &voice.invocation));
        layers.push(layer(LayerKind::CoreContext, &voice.core_context));
        if !selection.core.is_empty() {
            layers.push(layer(
                LayerKind::CorePerspectives,
                &render_fragments(&selection.core),
            ));
        }
        if let Some(last_stable) = layers.last_mut() {
            last_stable.cache_boundary = true;
        }

        if !selection.sampled.is_empty() {
            layers.push(layer(
                LayerKind::Perspectives,
                &render_fragments(&selection.sampled),
            ));
        }

        if let Some(letters) = &voice.team_letters {
            layers.push(layer(LayerKind::TeamLetters, letters));
        }

        let split = input.history.len().saturating_sub(FOREGROUND_TURNS);
        let (older, recent) = input.history.split_at(split);

        let background = render_background(input, older);
        if !background.is_empty() {
            layers.push(layer(LayerKind::Background, &background));
        }

        layers.push(layer(
            LayerKind::Foreground,
            &render_foreground(recent, input.message, input.author_name),
        ));
        layers.push(layer(LayerKind::Benediction, &voice.benediction));

        let messages = vec![ChatMessage::user(input.message)];

        let mut cached = true;
        let stats: Vec<LayerStats> = layers
            .iter()
            .map(|l| {
                let stat = LayerStats {
                    kind: l.kind,
                    tokens: token::estimate_tokens(&l.content),
                    cached,
                };
                if l.cache_boundary {
                    cached = false;
                }
                stat
            })
            .collect();
        let total_tokens = stats.iter().map(|s| s.tokens).sum::<usize>()
            + token::estimate_messages_tokens(&messages);

        debug!(
            layers = layers.len(),
            sampled = selection.sampled.len(),
            total_tokens,
            "Prompt compiled"
        );

        CompiledPrompt {
            layers,
            messages,
            stats,
            total_tokens,
        }
    }
}

fn layer(kind: LayerKind, body: &str) -> PromptLayer {
    let tag = kind.tag();
    PromptLayer {
        kind,
        content: format!("<{tag}>\n{body}\n</{tag}>"),
        cache_boundary: false,
    }
}

fn render_fragments(fragments: &[Arc<PerspectiveFragment>]) -> String {
    fragments
        .iter()
        .map(|f| format!("  <file name=\"{}\">\n{}\n  </file>", f.name, f.body))
        .collect::<Vec<_>>()
        .join("\n")
}

fn speaker<'a>(turn: &'a ConversationTurn, fallback: &'a str) -> &'a str {
    match turn.role {
        Role::Assistant => BOT_NAME,
        Role::User => turn.author_name.as_deref().unwrap_or(fallback),
    }
}

fn render_background(input: &CompileInput<'_>, older: &[ConversationTurn]) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(topic) = input.channel_topic.filter(|t| !t.trim().is_empty()) {
        parts.push(format!("Channel topic: {topic}"));
    }
    if let Some(context) = input.user_context.filter(|t| !t.trim().is_empty()) {
        parts.push(format!("User context: {context}"));
    }
    if let Some(patterns) = input.community_patterns.filter(|t| !t.trim().is_empty()) {
        parts.push(format!("Community patterns: {patterns}"));
    }
    if !older.is_empty() {
        let fallback = input.author_name.unwrap_or("User");
        let lines: Vec<String> = older
            .iter()
            .map(|t| {
                let mut text: String = t.text.chars().take(SUMMARY_CHARS).collect();
                if t.text.chars().count() > SUMMARY_CHARS {
                    text.push('…');
                }
                format!("- {}: {text}", speaker(t, fallback))
            })
            .collect();
        parts.push(format!("Earlier in this conversation:\n{}", lines.join("\n")));
    }
    parts.join("\n")
}

fn render_foreground(recent: &[ConversationTurn], message: &str, author: Option<&str>) -> String {
    let author = author.unwrap_or("User");
    let mut lines: Vec<String> = recent
        .iter()
        .map(|t| format!("{}: {}", speaker(t, author), t.text))
        .collect();
    lines.push(format!("{author}: {message}"));
    format!("Current moment:\n{}", lines.join("\n"))
}
