//! Handler table and hot reload.
//!
//! The dispatcher resolves every event against an immutable
//! [`HandlerTable`]. Reloading builds a fresh table from the registered
//! constructors and swaps the pointer; tasks already running keep the `Arc`
//! they resolved against.

use crate::handler::{CommandHandler, HandlerDescriptor};
use crate::intent;
use chrono::{DateTime, Utc};
use seedkeeper_core::InboundEvent;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::info;

/// Builds a fresh handler instance.
pub type HandlerFactory = fn() -> Arc<dyn CommandHandler>;

struct Entry {
    handler: Arc<dyn CommandHandler>,
    factory: HandlerFactory,
}

/// What an event resolved to.
pub enum Resolution {
    Run {
        handler: Arc<dyn CommandHandler>,
        /// Canonical command name, or the unknown token; `None` for conversation
        command: Option<String>,
        args: String,
    },
    /// A plain-language request recognised as an enabled command
    Intent {
        handler: Arc<dyn CommandHandler>,
        command: String,
        args: String,
    },
    /// A known command switched off in the bot configuration
    Disabled(String),
    /// Channel chatter not addressed to the bot
    Ignore,
}

pub struct HandlerTable {
    pub version: u64,
    pub built_at: DateTime<Utc>,
    entries: Vec<Entry>,
    disabled: BTreeSet<String>,
    conversation: Arc<dyn CommandHandler>,
    unknown: Arc<dyn CommandHandler>,
}

impl HandlerTable {
    pub fn resolve(&self, event: &InboundEvent, marker: char) -> Resolution {
        if let Some((token, args)) = event.command(marker) {
            let Some(entry) = self
                .entries
                .iter()
                .find(|e| e.handler.descriptor().matches(&token))
            else {
                return Resolution::Run {
                    handler: self.unknown.clone(),
                    command: Some(token),
                    args,
                };
            };
            let name = entry.handler.descriptor().name;
            if self.disabled.contains(name) {
                return Resolution::Disabled(name.to_string());
            }
            return Resolution::Run {
                handler: entry.handler.clone(),
                command: Some(name.to_string()),
                args,
            };
        }

        if event.is_direct_message || event.mentions_bot {
            if let Some(found) = intent::detect(&event.raw_text, event.mentions_bot) {
                let enabled = self
                    .entries
                    .iter()
                    .find(|e| e.handler.descriptor().name == found.command)
                    .filter(|_| !self.disabled.contains(found.command));
                if let Some(entry) = enabled {
                    return Resolution::Intent {
                        handler: entry.handler.clone(),
                        command: found.command.to_string(),
                        args: found.args,
                    };
                }
            }
            return Resolution::Run {
                handler: self.conversation.clone(),
                command: None,
                args: event.raw_text.clone(),
            };
        }
        Resolution::Ignore
    }

    /// Enabled command handlers in table order.
    pub fn enabled(&self) -> impl Iterator<Item = &HandlerDescriptor> {
        self.entries
            .iter()
            .map(|e| e.handler.descriptor())
            .filter(|d| !self.disabled.contains(d.name))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn CommandHandler>> {
        self.entries
            .iter()
            .find(|e| e.handler.descriptor().matches(name))
            .map(|e| &e.handler)
    }

    pub fn conversation(&self) -> &Arc<dyn CommandHandler> {
        &self.conversation
    }

    pub fn disabled(&self) -> &BTreeSet<String> {
        &self.disabled
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct HandlerRegistry {
    factories: Vec<HandlerFactory>,
    conversation: HandlerFactory,
    unknown: HandlerFactory,
    current: RwLock<Arc<HandlerTable>>,
    next_version: AtomicU64,
    reloads: AtomicU64,
}

impl HandlerRegistry {
    pub fn new(
        factories: Vec<HandlerFactory>,
        conversation: HandlerFactory,
        unknown: HandlerFactory,
    ) -> Self {
        let table = Self::build(&factories, conversation, unknown, 1, BTreeSet::new());
        Self {
            factories,
            conversation,
            unknown,
            current: RwLock::new(Arc::new(table)),
            next_version: AtomicU64::new(2),
            reloads: AtomicU64::new(0),
        }
    }

    fn build(
        factories: &[HandlerFactory],
        conversation: HandlerFactory,
        unknown: HandlerFactory,
        version: u64,
        disabled: BTreeSet<String>,
    ) -> HandlerTable {
        HandlerTable {
            version,
            built_at: Utc::now(),
            entries: factories
                .iter()
                .map(|factory| Entry {
                    handler: factory(),
                    factory: *factory,
                })
                .collect(),
            disabled,
            conversation: conversation(),
            unknown: unknown(),
        }
    }

    /// The table the next dispatch resolves against.
    pub fn current(&self) -> Arc<HandlerTable> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Rebuild every handler and swap the table in.
    pub fn rebuild(&self, disabled: BTreeSet<String>) -> Arc<HandlerTable> {
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        let table = Arc::new(Self::build(
            &self.factories,
            self.conversation,
            self.unknown,
            version,
            disabled,
        ));
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = table.clone();
        self.reloads.fetch_add(1, Ordering::Relaxed);
        info!(
            version,
            handlers = table.len(),
            disabled = table.disabled.len(),
            "Handler table rebuilt"
        );
        table
    }

    /// Rebuild a single command's handler, keeping every other instance.
    /// Returns `None` if no command has that name or alias.
    pub fn reload_command(&self, name: &str) -> Option<Arc<HandlerTable>> {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        let position = current
            .entries
            .iter()
            .position(|e| e.handler.descriptor().matches(name))?;

        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        let entries = current
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| Entry {
                handler: if i == position {
                    (e.factory)()
                } else {
                    e.handler.clone()
                },
                factory: e.factory,
            })
            .collect();
        let table = Arc::new(HandlerTable {
            version,
            built_at: Utc::now(),
            entries,
            disabled: current.disabled.clone(),
            conversation: current.conversation.clone(),
            unknown: current.unknown.clone(),
        });
        *current = table.clone();
        drop(current);

        self.reloads.fetch_add(1, Ordering::Relaxed);
        info!(version, command = name, "Handler reloaded");
        Some(table)
    }

    /// Number of swaps since start.
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WorkerContext;
    use crate::handler::{Category, Invocation, Reply};
    use async_trait::async_trait;
    use chrono::Utc;

    struct Fixed(HandlerDescriptor);

    #[async_trait]
    impl CommandHandler for Fixed {
        fn descriptor(&self) -> &HandlerDescriptor {
            &self.0
        }

        async fn handle(
            &self,
            _inv: &Invocation,
            _ctx: &WorkerContext,
        ) -> seedkeeper_core::Result<Reply> {
            Ok(Reply::text(self.0.name))
        }
    }

    fn hello() -> Arc<dyn CommandHandler> {
        Arc::new(Fixed(HandlerDescriptor {
            aliases: &["hi", "intro"],
            ..HandlerDescriptor::new("hello", Category::Garden)
        }))
    }

    fn seeds() -> Arc<dyn CommandHandler> {
        Arc::new(Fixed(HandlerDescriptor::new("seeds", Category::Garden)))
    }

    fn conversation() -> Arc<dyn CommandHandler> {
        Arc::new(Fixed(HandlerDescriptor::new("conversation", Category::General)))
    }

    fn unknown() -> Arc<dyn CommandHandler> {
        Arc::new(Fixed(HandlerDescriptor::new("unknown", Category::General)))
    }

    fn registry() -> HandlerRegistry {
        HandlerRegistry::new(vec![hello, seeds], conversation, unknown)
    }

    fn event(text: &str, dm: bool, mention: bool) -> InboundEvent {
        InboundEvent {
            event_id: "1".into(),
            channel_id: "c".into(),
            guild_id: None,
            author_id: "u".into(),
            author_name: None,
            is_direct_message: dm,
            mentions_bot: mention,
            raw_text: text.into(),
            timestamp: Utc::now(),
            reply_context: None,
            channel_topic: None,
        }
    }

    fn resolved_name(resolution: Resolution) -> Option<(String, Option<String>)> {
        match resolution {
            Resolution::Run {
                handler, command, ..
            } => Some((handler.descriptor().name.to_string(), command)),
            Resolution::Intent {
                handler, command, ..
            } => Some((handler.descriptor().name.to_string(), Some(command))),
            _ => None,
        }
    }

    #[test]
    fn resolves_commands_aliases_and_conversation() {
        let table = registry().current();
        let marker = '!';

        assert_eq!(
            resolved_name(table.resolve(&event("!HI there", false, false), marker)),
            Some(("hello".into(), Some("hello".into())))
        );
        assert_eq!(
            resolved_name(table.resolve(&event("!bloom", false, false), marker)),
            Some(("unknown".into(), Some("bloom".into())))
        );
        assert_eq!(
            resolved_name(table.resolve(&event("lovely day", true, false), marker)),
            Some(("conversation".into(), None))
        );
        assert_eq!(
            resolved_name(table.resolve(&event("lovely day <@1>", false, true), marker)),
            Some(("conversation".into(), None))
        );
        assert!(matches!(
            table.resolve(&event("just chatting", false, false), marker),
            Resolution::Ignore
        ));
    }

    #[test]
    fn plain_requests_reach_enabled_commands() {
        let registry = registry();
        let table = registry.current();
        assert_eq!(
            resolved_name(table.resolve(&event("hey!", true, false), '!')),
            Some(("hello".into(), Some("hello".into())))
        );
        match table.resolve(&event("<@1> give me some seeds", false, true), '!') {
            Resolution::Intent { command, args, .. } => {
                assert_eq!(command, "seeds");
                assert_eq!(args, "");
            }
            _ => panic!("expected an intent"),
        }
        // Channel chatter is never read for intents.
        assert!(matches!(
            table.resolve(&event("hey!", false, false), '!'),
            Resolution::Ignore
        ));

        // A switched-off command leaves the request to conversation.
        let table = registry.rebuild(BTreeSet::from(["seeds".to_string()]));
        assert_eq!(
            resolved_name(table.resolve(&event("give me some seeds", true, false), '!')),
            Some(("conversation".into(), None))
        );
    }

    #[test]
    fn rebuild_swaps_without_touching_captured_tables() {
        let registry = registry();
        let before = registry.current();
        let after = registry.rebuild(BTreeSet::new());

        assert!(after.version > before.version);
        assert!(!Arc::ptr_eq(
            before.get("hello").unwrap(),
            after.get("hello").unwrap()
        ));
        // The captured table still resolves to its own instances.
        assert!(Arc::ptr_eq(
            before.get("hello").unwrap(),
            before.get("hi").unwrap()
        ));
        assert_eq!(registry.current().version, after.version);
        assert_eq!(registry.reload_count(), 1);
    }

    #[test]
    fn disabled_commands_resolve_to_disabled() {
        let registry = registry();
        let table = registry.rebuild(BTreeSet::from(["seeds".to_string()]));
        assert!(matches!(
            table.resolve(&event("!seeds", false, false), '!'),
            Resolution::Disabled(name) if name == "seeds"
        ));
        let listed: Vec<&str> = table.enabled().map(|d| d.name).collect();
        assert_eq!(listed, vec!["hello"]);
    }

    #[test]
    fn single_command_reload_keeps_others() {
        let registry = registry();
        let before = registry.current();
        let after = registry.reload_command("intro").unwrap();

        assert!(!Arc::ptr_eq(
            before.get("hello").unwrap(),
            after.get("hello").unwrap()
        ));
        assert!(Arc::ptr_eq(
            before.get("seeds").unwrap(),
            after.get("seeds").unwrap()
        ));
        assert!(registry.reload_command("bloom").is_none());
    }
}
