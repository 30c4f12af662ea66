//! Garden commands: short prompts answered by the economical tier.

use super::{Ask, ask_backend, truncate_chars};
use crate::context::WorkerContext;
use crate::handler::{Category, CommandHandler, HandlerDescriptor, Invocation, Reply};
use crate::rate_limit::RateClass;
use async_trait::async_trait;
use chrono::{Local, Timelike};
use rand::seq::IndexedRandom;
use seedkeeper_core::{ModelChoice, Result};
use seedkeeper_prompt::PerspectiveFragment;
use std::sync::Arc;
use tracing::warn;

const SOURCE_BASE: &str = "https://lightward.com";
const REFLECTION_CHARS: usize = 2000;
const WHISPER_CHARS: usize = 150;

const GARDEN: HandlerDescriptor = HandlerDescriptor {
    rate_class: Some(RateClass::Garden),
    route: Some(ModelChoice::Economical),
    ..HandlerDescriptor::new("garden", Category::Garden)
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Hello,
    About,
    Seeds,
    Tend,
    Seasons,
    Garden,
}

pub struct GardenHandler {
    kind: Kind,
    descriptor: HandlerDescriptor,
}

pub fn hello() -> Arc<dyn CommandHandler> {
    Arc::new(GardenHandler {
        kind: Kind::Hello,
        descriptor: HandlerDescriptor {
            name: "hello",
            aliases: &["hi", "intro"],
            summary: "A greeting for this time of day",
            ..GARDEN
        },
    })
}

pub fn about() -> Arc<dyn CommandHandler> {
    Arc::new(GardenHandler {
        kind: Kind::About,
        descriptor: HandlerDescriptor {
            name: "about",
            aliases: &["whoami", "whoareyou"],
            summary: "Who I am and what I do here",
            category: Category::General,
            rate_class: None,
            ..GARDEN
        },
    })
}

pub fn seeds() -> Arc<dyn CommandHandler> {
    Arc::new(GardenHandler {
        kind: Kind::Seeds,
        descriptor: HandlerDescriptor {
            name: "seeds",
            summary: "A reflection on one perspective from the library",
            ..GARDEN
        },
    })
}

pub fn tend() -> Arc<dyn CommandHandler> {
    Arc::new(GardenHandler {
        kind: Kind::Tend,
        descriptor: HandlerDescriptor {
            name: "tend",
            usage: "[theme]",
            summary: "Wisdom about tending something",
            ..GARDEN
        },
    })
}

pub fn seasons() -> Arc<dyn CommandHandler> {
    Arc::new(GardenHandler {
        kind: Kind::Seasons,
        descriptor: HandlerDescriptor {
            name: "seasons",
            usage: "[topic]",
            summary: "What season the community is in",
            ..GARDEN
        },
    })
}

pub fn garden() -> Arc<dyn CommandHandler> {
    Arc::new(GardenHandler {
        kind: Kind::Garden,
        descriptor: HandlerDescriptor {
            usage: "[topic]",
            summary: "How the garden feels right now",
            ..GARDEN
        },
    })
}

fn time_of_day(hour: u32) -> &'static str {
    match hour {
        5..=11 => "the morning light",
        12..=16 => "the afternoon warmth",
        17..=20 => "the evening glow",
        _ => "the quiet of night",
    }
}

/// A meaningful line from a random fragment: long enough to carry a
/// thought, not a heading.
fn whisper(fragment: &PerspectiveFragment) -> Option<String> {
    let lines: Vec<&str> = fragment
        .body
        .lines()
        .map(str::trim)
        .filter(|l| l.chars().count() > 20 && !l.starts_with('#'))
        .collect();
    lines
        .choose(&mut rand::rng())
        .map(|line| truncate_chars(line, WHISPER_CHARS))
}

/// `3-perspectives/two-by-two` → (`two-by-two`, `Two By Two`).
fn source_names(name: &str) -> (String, String) {
    let slug = name.rsplit('/').next().unwrap_or(name).to_string();
    let display = slug
        .split('-')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    (slug, display)
}

fn pick<'a>(options: &'a [&'a str]) -> &'a str {
    options.choose(&mut rand::rng()).copied().unwrap_or("🌱")
}

fn about_text(whisper: Option<String>) -> String {
    let mut text = String::from(
        "**About Seedkeeper**\n\n\
         I'm Seedkeeper, a presence in The Garden Cafe community.\n\n\
         **What I do:**\n\
         - Chat and reflect on perspectives (`!seeds`)\n\
         - Summarize conversations (`!catchup`)\n\
         - Track birthdays (`!birthday`)\n\
         - Remember our conversations (`!memory`)\n",
    );
    if let Some(line) = whisper {
        text.push_str(&format!("\n*Something I'm carrying today: {line}*\n"));
    }
    text.push_str("\nType `!commands` for the full list.");
    text
}

impl GardenHandler {
    fn random_fragment(&self, ctx: &WorkerContext) -> Option<Arc<PerspectiveFragment>> {
        ctx.compiler.perspectives().snapshot().random()
    }

    async fn seeds(&self, inv: &Invocation, ctx: &WorkerContext) -> Result<Reply> {
        let Some(fragment) = self.random_fragment(ctx) else {
            return Ok(Reply::text(
                "🌱 No perspectives are loaded right now. A garden keeper can refresh them.",
            ));
        };
        let (slug, display) = source_names(&fragment.name);
        let prompt = format!(
            "Here's a perspective called \"{display}\":\n\n---\n{}\n---\n\n\
             Share a brief, genuine reflection (2-3 sentences). What stands out? \
             Then invite the person to share what resonates with them.",
            truncate_chars(&fragment.body, REFLECTION_CHARS)
        );
        let ask = Ask {
            max_tokens: 400,
            temperature: Some(0.8),
            ..Ask::new(&prompt)
        };

        match ask_backend(ctx, inv, ModelChoice::Economical, ask).await {
            Ok(text) => Ok(Reply::Text(format!(
                "**{display}**\n\n{text}\n\n*Source: <{SOURCE_BASE}/{slug}>*"
            ))),
            Err(e) => {
                warn!(perspective = %fragment.name, error = %e, "Reflection failed");
                Ok(Reply::Text(format!(
                    "Found *{display}* but got tangled thinking about it. Try again?"
                )))
            }
        }
    }

    fn prompt(&self, inv: &Invocation, whisper: Option<&str>) -> String {
        let topic = inv.args.trim();
        let topic = (!topic.is_empty()).then_some(topic);
        let body = match self.kind {
            Kind::Hello => {
                let moment = time_of_day(Local::now().hour());
                format!(
                    "Someone just said hello to you in {moment}.\n\
                     Greet them as yourself - warm, present, real."
                )
            }
            Kind::Tend => format!(
                "Someone is asking about tending to {}.\n\
                 Meet them where they are. What would you share, friend to friend?",
                topic.unwrap_or("something")
            ),
            Kind::Seasons => format!(
                "Someone's wondering about the community's season or energy.\n{}\n\
                 What have you noticed lately?",
                topic
                    .map(|t| format!("They're thinking about: {t}"))
                    .unwrap_or_default()
            ),
            Kind::Garden => format!(
                "Someone's checking on the garden - the community vibe.\n{}\n\
                 How does it feel to you right now?",
                topic
                    .map(|t| format!("They're curious about: {t}"))
                    .unwrap_or_default()
            ),
            Kind::About | Kind::Seeds => String::new(),
        };
        match whisper {
            Some(line) => format!("{body}\n\nA whisper from the garden: {line}"),
            None => body,
        }
    }

    fn decoration(&self) -> (&'static [&'static str], &'static str) {
        match self.kind {
            Kind::Hello => (
                &["🌱", "🌿", "🌸", "☀️", "🍃"],
                "🌱 Hello there! What a lovely moment to meet in this garden. How are you finding today?",
            ),
            Kind::Tend => (
                &["🌱", "🌿", "🪴", "💧"],
                "*Some things grow best with patience and a little water... try again in a moment.*",
            ),
            Kind::Seasons => (
                &["🍂", "🌸", "❄️", "☀️"],
                "*The seasons shift too quickly to measure right now... try again in a moment.*",
            ),
            _ => (
                &["🌻", "🌿", "🌱", "🍃"],
                "*The garden is quiet right now... try again in a moment.*",
            ),
        }
    }
}

#[async_trait]
impl CommandHandler for GardenHandler {
    fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    async fn handle(&self, inv: &Invocation, ctx: &WorkerContext) -> Result<Reply> {
        match self.kind {
            Kind::About => {
                let line = self.random_fragment(ctx).and_then(|f| whisper(&f));
                return Ok(Reply::Text(about_text(line)));
            }
            Kind::Seeds => return self.seeds(inv, ctx).await,
            _ => {}
        }

        let line = self.random_fragment(ctx).and_then(|f| whisper(&f));
        let prompt = self.prompt(inv, line.as_deref());
        let ask = Ask {
            max_tokens: if self.kind == Kind::Hello { 600 } else { 700 },
            ..Ask::new(&prompt)
        };
        let (emoji, fallback) = self.decoration();

        match ask_backend(ctx, inv, ModelChoice::Economical, ask).await {
            Ok(text) => Ok(Reply::Text(format!("{} {text}", pick(emoji)))),
            Err(e) => {
                warn!(command = self.descriptor.name, error = %e, "Garden prompt failed");
                Ok(Reply::text(fallback))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{MockProvider, harness, invocation};
    use seedkeeper_core::error::ProviderError;

    const CORPUS: &str = "<file name=\"3-perspectives/two-by-two.txt\">\n\
        # Two by two\n\
        Every pairing holds a small universe between its members.\n\
        </file>";

    #[test]
    fn slugs_become_titles() {
        assert_eq!(
            source_names("3-perspectives/two-by-two"),
            ("two-by-two".to_string(), "Two By Two".to_string())
        );
        assert_eq!(source_names("presence").1, "Presence");
    }

    #[test]
    fn every_hour_has_a_moment() {
        for hour in 0..24 {
            assert!(!time_of_day(hour).is_empty());
        }
        assert_eq!(time_of_day(9), "the morning light");
    }

    #[tokio::test]
    async fn seeds_links_the_source() {
        let h = harness(MockProvider::replying("It stands out."));
        h.ctx.compiler.perspectives().load(CORPUS);

        let reply = seeds()
            .handle(&invocation("seeds", "", "42", false), &h.ctx)
            .await
            .unwrap();
        let Reply::Text(text) = reply else {
            panic!("expected text");
        };
        assert!(text.starts_with("**Two By Two**"));
        assert!(text.contains("<https://lightward.com/two-by-two>"));

        let request = h.provider.last_request().unwrap();
        assert_eq!(request.max_tokens, 400);
        assert_eq!(request.model, h.ctx.config.backend.economical_model);
    }

    #[tokio::test]
    async fn tend_falls_back_when_the_backend_fails() {
        let h = harness(MockProvider::failing(ProviderError::Timeout("slow".into())));
        let reply = tend()
            .handle(&invocation("tend", "new members", "42", false), &h.ctx)
            .await
            .unwrap();
        assert_eq!(
            reply,
            Reply::text(
                "*Some things grow best with patience and a little water... try again in a moment.*"
            )
        );
    }

    #[tokio::test]
    async fn about_needs_no_backend() {
        let h = harness(MockProvider::replying("unused"));
        let reply = about()
            .handle(&invocation("about", "", "42", false), &h.ctx)
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Text(t) if t.starts_with("**About Seedkeeper**")));
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn tend_prompt_carries_the_theme() {
        let h = harness(MockProvider::replying("Water the roots."));
        let reply = tend()
            .handle(&invocation("tend", "new members", "42", false), &h.ctx)
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Text(t) if t.ends_with("Water the roots.")));
        let request = h.provider.last_request().unwrap();
        assert!(request.messages[0].content.contains("tending to new members"));
    }
}
