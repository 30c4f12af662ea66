//! Per-user sliding-window rate limits.
//!
//! Every command class has its own rule set (calls per minute, hour, and
//! day plus a cooldown between consecutive calls). Limits are checked before
//! a handler runs, so a denied request never reaches the backend. Usage is
//! kept in the broker, so a user gets one budget however many workers
//! serve them.

use crate::lock;
use chrono::Utc;
use seedkeeper_config::{RateLimitConfig, RateLimitRule};
use seedkeeper_core::broker::{Broker, get_json, set_json};
use seedkeeper_core::error::BrokerError;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3_600);
const DAY: Duration = Duration::from_secs(86_400);

/// The class a command is metered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateClass {
    Catchup,
    Conversation,
    Garden,
    Birthday,
}

impl fmt::Display for RateClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Catchup => "catchup",
            Self::Conversation => "conversation",
            Self::Garden => "garden",
            Self::Birthday => "birthday",
        };
        f.write_str(name)
    }
}

/// Why a request was refused, with the reply shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub class: RateClass,
    pub retry_after: Duration,
    pub message: String,
}

impl Denial {
    fn cooldown(class: RateClass, retry_after: Duration) -> Self {
        let secs = ceil_secs(retry_after);
        let message = match class {
            RateClass::Catchup => format!(
                "*The garden needs a moment to breathe... Please wait {secs} seconds between catchup requests.*"
            ),
            RateClass::Birthday => format!(
                "*Patience, dear gardener... Wait {secs} seconds between birthday commands.*"
            ),
            _ => format!("*The garden needs a moment to breathe... Please wait {secs} seconds.*"),
        };
        Self {
            class,
            retry_after,
            message,
        }
    }

    fn window(class: RateClass, limit: usize, window: Duration, retry_after: Duration) -> Self {
        let wait = describe_wait(retry_after);
        let message = match (class, window) {
            (RateClass::Catchup, DAY) => format!(
                "*You've tended the garden thoroughly today... You've reached the daily limit of {limit} catchups. Please return in {wait}.*"
            ),
            (RateClass::Catchup, _) => format!(
                "*The garden needs time to regenerate... You've reached the limit of {limit} catchups per {}. Please return in {wait}.*",
                window_name(window)
            ),
            (RateClass::Birthday, _) => format!(
                "*So many celebrations! You've reached the limit of {limit} birthday commands per {}. Please return in {wait}.*",
                window_name(window)
            ),
            _ => format!(
                "*The garden paths need a moment to clear... Please slow down and try again in {wait}.*"
            ),
        };
        Self {
            class,
            retry_after,
            message,
        }
    }
}

fn window_name(window: Duration) -> &'static str {
    match window {
        MINUTE => "minute",
        HOUR => "hour",
        _ => "day",
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

fn describe_wait(d: Duration) -> String {
    let secs = ceil_secs(d).max(1);
    match secs {
        1 => "1 second".into(),
        s if s < 60 => format!("{s} seconds"),
        s if s < 3_600 => {
            let m = s.div_ceil(60);
            if m == 1 { "1 minute".into() } else { format!("{m} minutes") }
        }
        s => {
            let h = s.div_ceil(3_600);
            if h == 1 { "1 hour".into() } else { format!("{h} hours") }
        }
    }
}

/// Broker key holding one user's call timestamps for one class.
fn usage_key(class: RateClass, user_id: &str) -> String {
    format!("ratelimit:{class}:{user_id}")
}

/// Wall-clock milliseconds advanced by the tokio clock, so every worker
/// stamps calls on the same scale and paused-clock tests stay exact.
struct Clock {
    wall_ms: i64,
    started: Instant,
}

impl Clock {
    fn new() -> Self {
        Self {
            wall_ms: Utc::now().timestamp_millis(),
            started: Instant::now(),
        }
    }

    fn now_ms(&self) -> i64 {
        self.wall_ms + self.started.elapsed().as_millis() as i64
    }
}

fn elapsed(now_ms: i64, then_ms: i64) -> Duration {
    Duration::from_millis(now_ms.saturating_sub(then_ms).max(0) as u64)
}

/// Apply `rule` to the calls already made. Refusal carries the wait.
fn evaluate(rule: &RateLimitRule, class: RateClass, stamps: &[i64], now_ms: i64) -> Result<(), Denial> {
    if rule.cooldown_secs > 0 {
        if let Some(last) = stamps.last() {
            let cooldown = Duration::from_secs(rule.cooldown_secs);
            let since = elapsed(now_ms, *last);
            if since < cooldown {
                return Err(Denial::cooldown(class, cooldown - since));
            }
        }
    }

    let windows = [
        (rule.per_minute, MINUTE),
        (rule.per_hour, HOUR),
        (rule.per_day, DAY),
    ];
    for (limit, window) in windows {
        let Some(limit) = limit else { continue };
        let mut in_window = stamps.iter().filter(|t| elapsed(now_ms, **t) < window);
        let oldest = in_window.next().copied();
        let count = oldest.map_or(0, |_| 1 + in_window.count());
        if count >= limit {
            let retry_after =
                oldest.map_or(window, |t| window.saturating_sub(elapsed(now_ms, t)));
            return Err(Denial::window(class, limit, window, retry_after));
        }
    }
    Ok(())
}

/// Limits shared by every worker: usage lives in the broker, and each
/// user/class pair is updated under a short broker lock.
///
/// Broker trouble never blocks a user. When the broker fails or the lock
/// stays busy the call is allowed and a warning logged.
pub struct RateLimiter {
    enabled: bool,
    rules: HashMap<RateClass, RateLimitRule>,
    broker: Arc<dyn Broker>,
    clock: Clock,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, broker: Arc<dyn Broker>) -> Self {
        let rules = HashMap::from([
            (RateClass::Catchup, config.catchup.clone()),
            (RateClass::Conversation, config.conversation.clone()),
            (RateClass::Garden, config.garden.clone()),
            (RateClass::Birthday, config.birthday.clone()),
        ]);
        Self {
            enabled: config.enabled,
            rules,
            broker,
            clock: Clock::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record a call by `user_id` in `class`, or refuse it.
    ///
    /// Refused calls are not recorded, so waiting out the reported delay is
    /// always enough.
    pub async fn check(&self, user_id: &str, class: RateClass) -> Result<(), Denial> {
        if !self.enabled {
            return Ok(());
        }
        let Some(rule) = self.rules.get(&class) else {
            return Ok(());
        };

        let key = usage_key(class, user_id);
        let Some(held) = lock::acquire(self.broker.as_ref(), &format!("{key}:lock")).await else {
            warn!(user_id, %class, "Rate limit lock unavailable, allowing call");
            return Ok(());
        };
        let verdict = self.record(&key, rule, class).await;
        held.release(self.broker.as_ref()).await;

        match verdict {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(user_id, %class, error = %e, "Rate limit state unavailable, allowing call");
                Ok(())
            }
        }
    }

    async fn record(
        &self,
        key: &str,
        rule: &RateLimitRule,
        class: RateClass,
    ) -> Result<Result<(), Denial>, BrokerError> {
        let now = self.clock.now_ms();
        let mut stamps: Vec<i64> = get_json(self.broker.as_ref(), key)
            .await?
            .unwrap_or_default();
        stamps.retain(|t| elapsed(now, *t) < DAY);

        if let Err(denial) = evaluate(rule, class, &stamps, now) {
            debug!(key, retry_after_secs = denial.retry_after.as_secs(), "Rate limited");
            return Ok(Err(denial));
        }
        stamps.push(now);
        set_json(self.broker.as_ref(), key, &stamps, Some(DAY)).await?;
        Ok(Ok(()))
    }
}
