//! `!birthday`: remembering and announcing birthdays.

use super::split_subcommand;
use crate::birthdays::{UpcomingBirthday, format_month_day, parse_month_day};
use crate::context::WorkerContext;
use crate::handler::{Category, CommandHandler, HandlerDescriptor, Invocation, Reply};
use crate::keepers::parse_user_mention;
use crate::rate_limit::RateClass;
use async_trait::async_trait;
use chrono::Utc;
use seedkeeper_core::Result;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;
use tracing::info;

const DEFAULT_WINDOW: i64 = 7;
const MAX_WINDOW: i64 = 366;

const HELP: &str = "🎂 **Birthday Commands**\n\
    `!birthday mine <date>` - Set your birthday\n\
    `!birthday remove` - Remove your birthday\n\
    `!birthday list` - Show upcoming birthdays (next 7 days)\n\
    `!birthday list all` - Show all registered birthdays\n\
    `!birthday upcoming [days]` - Show next N days\n\
    *Date formats:* `03-15`, `03/15`, `March 15`, `15 March`";

const KEEPER_HELP: &str = "\n\n**Garden Keeper Commands:**\n\
    `!birthday set @user <date>` - Set someone's birthday\n\
    `!birthday remove @user` - Remove someone's birthday";

pub struct BirthdayHandler {
    descriptor: HandlerDescriptor,
}

pub fn factory() -> Arc<dyn CommandHandler> {
    Arc::new(BirthdayHandler {
        descriptor: HandlerDescriptor {
            usage: "<mine|set|remove|list|upcoming> ...",
            summary: "Share your birthday and see who's celebrating soon",
            rate_class: Some(RateClass::Birthday),
            ..HandlerDescriptor::new("birthday", Category::Birthdays)
        },
    })
}

fn upcoming_text(found: &[UpcomingBirthday], days: i64) -> String {
    if found.is_empty() {
        return format!("No upcoming birthdays in the next {days} days! 🌱");
    }
    let mut text = format!("🎂 **Upcoming Birthdays (next {days} days)**\n");
    for b in found {
        let date = format_month_day(b.month, b.day);
        let _ = match b.days_until {
            0 => writeln!(text, "• <@{}> - **Today!** {date} 🎉", b.user_id),
            1 => writeln!(text, "• <@{}> - Tomorrow ({date})", b.user_id),
            n => writeln!(text, "• <@{}> - {date} ({n} days)", b.user_id),
        };
    }
    text
}

impl BirthdayHandler {
    async fn mine(&self, inv: &Invocation, ctx: &WorkerContext, date: &str) -> Result<String> {
        let (month, day) = match parse_month_day(date) {
            Ok(parsed) => parsed,
            Err(e) => return Ok(format!("❌ {e}")),
        };
        ctx.birthdays
            .set(inv.author_id(), month, day, inv.author_id())
            .await?;
        Ok(format!("🎂 Birthday set for {}!", format_month_day(month, day)))
    }

    async fn set(&self, inv: &Invocation, ctx: &WorkerContext, rest: &str) -> Result<String> {
        let (who, date) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        let Some(target) = parse_user_mention(who).filter(|_| !date.trim().is_empty()) else {
            return Ok("❌ Please mention a user or provide their ID:\n\
                       `!birthday set @user <date>`"
                .to_string());
        };

        let require_admin = ctx.bot_config.get().await.require_admin_for_birthday_set;
        if target != inv.author_id() && require_admin && !inv.is_admin {
            return Ok("🚫 Only Garden Keepers can set others' birthdays.".to_string());
        }

        let (month, day) = match parse_month_day(date) {
            Ok(parsed) => parsed,
            Err(e) => return Ok(format!("❌ {e}")),
        };
        ctx.birthdays.set(&target, month, day, inv.author_id()).await?;
        info!(user_id = %target, set_by = %inv.author_id(), "Birthday set");
        Ok(format!(
            "🎂 Birthday set for <@{target}>: {}!",
            format_month_day(month, day)
        ))
    }

    async fn remove(&self, inv: &Invocation, ctx: &WorkerContext, rest: &str) -> Result<String> {
        let target = parse_user_mention(rest).unwrap_or_else(|| inv.author_id().to_string());
        let own = target == inv.author_id();

        if !own {
            let require_admin = ctx.bot_config.get().await.require_admin_for_birthday_remove;
            if require_admin && !inv.is_admin {
                return Ok("🚫 Only Garden Keepers can remove others' birthdays.".to_string());
            }
        }

        let removed = ctx.birthdays.remove(&target).await?;
        Ok(match (removed, own) {
            (true, true) => "🎂 Your birthday has been removed.".to_string(),
            (true, false) => "🎂 Birthday removed!".to_string(),
            (false, true) => "❌ You don't have a birthday set.".to_string(),
            (false, false) => format!("❌ No birthday found for <@{target}>."),
        })
    }

    async fn list(&self, ctx: &WorkerContext, rest: &str) -> String {
        if !rest.eq_ignore_ascii_case("all") {
            let today = Utc::now().date_naive();
            let found = ctx.birthdays.upcoming(today, DEFAULT_WINDOW).await;
            let mut text = upcoming_text(&found, DEFAULT_WINDOW);
            text.push_str("\n💡 Use `!birthday list all` to see all birthdays");
            return text;
        }

        let all = ctx.birthdays.all().await;
        if all.is_empty() {
            return "No birthdays registered yet! 🌱\nUse `!birthday mine <date>` to add yours!"
                .to_string();
        }

        let mut by_month: BTreeMap<u32, Vec<(u32, &str)>> = BTreeMap::new();
        for (user_id, entry) in &all {
            by_month
                .entry(entry.month)
                .or_default()
                .push((entry.day, user_id.as_str()));
        }

        let mut text = format!(
            "🎂 **All Registered Birthdays**\n*Total: {} birthdays*\n",
            all.len()
        );
        for (month, mut people) in by_month {
            people.sort();
            let heading = format_month_day(month, 1);
            let month_name = heading.split(' ').next().unwrap_or(&heading);
            let _ = write!(text, "\n**{month_name}**\n");
            for (day, user_id) in people {
                let _ = writeln!(text, "- <@{user_id}> - {}", format_month_day(month, day));
            }
        }
        text
    }

    async fn upcoming(&self, ctx: &WorkerContext, rest: &str) -> String {
        let days = rest
            .parse::<i64>()
            .unwrap_or(DEFAULT_WINDOW)
            .clamp(1, MAX_WINDOW);
        let today = Utc::now().date_naive();
        let found = ctx.birthdays.upcoming(today, days).await;
        upcoming_text(&found, days)
    }
}

#[async_trait]
impl CommandHandler for BirthdayHandler {
    fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    async fn handle(&self, inv: &Invocation, ctx: &WorkerContext) -> Result<Reply> {
        let (sub, rest) = split_subcommand(&inv.args);
        let text = match sub.as_str() {
            "" | "help" => {
                if inv.is_admin {
                    format!("{HELP}{KEEPER_HELP}")
                } else {
                    HELP.to_string()
                }
            }
            "mine" if !rest.is_empty() => self.mine(inv, ctx, rest).await?,
            "set" => self.set(inv, ctx, rest).await?,
            "remove" => self.remove(inv, ctx, rest).await?,
            "list" => self.list(ctx, rest).await,
            "upcoming" => self.upcoming(ctx, rest).await,
            _ => "Use `!birthday` to see available commands.".to_string(),
        };
        Ok(Reply::Text(text))
    }
}
