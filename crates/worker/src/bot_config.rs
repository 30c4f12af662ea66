//! Run-time configuration changed from chat with `!config`.

use seedkeeper_core::error::MemoryError;
use seedkeeper_memory::JsonRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::info;

const MAX_CATCHUP_LIMIT: u64 = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub require_admin_for_birthday_remove: bool,
    pub require_admin_for_birthday_set: bool,
    pub allow_dm_commands: bool,
    pub max_catchup_messages: usize,
    /// Commands the handler table leaves out on the next reload
    pub disabled_commands: Vec<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            require_admin_for_birthday_remove: true,
            require_admin_for_birthday_set: false,
            allow_dm_commands: true,
            max_catchup_messages: 100,
            disabled_commands: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigUpdateError {
    #[error("Configuration key '{0}' not found.")]
    UnknownKey(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error(transparent)]
    Storage(#[from] MemoryError),
}

/// Interpret a value typed in chat: `true/yes/on`, `false/no/off`,
/// integers, anything else is text.
pub fn parse_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    match trimmed.to_lowercase().as_str() {
        "true" | "yes" | "on" => Value::Bool(true),
        "false" | "no" | "off" => Value::Bool(false),
        lower => lower
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(trimmed.to_string())),
    }
}

fn command_list(raw: &str) -> Value {
    let names: BTreeSet<String> = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(|s| s.trim().trim_start_matches('!').to_lowercase())
        .filter(|s| !s.is_empty() && s != "none")
        .collect();
    Value::from(names.into_iter().collect::<Vec<_>>())
}

/// `max_catchup_messages` → `Max Catchup Messages`.
pub fn readable_key(key: &str) -> String {
    key.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) if items.is_empty() => "none".into(),
        Value::Array(items) => items
            .iter()
            .map(display)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

pub struct BotConfigStore {
    record: JsonRecord<BotConfig>,
}

impl BotConfigStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        Self {
            record: JsonRecord::load(path),
        }
    }

    pub async fn get(&self) -> BotConfig {
        self.record.get().await
    }

    pub async fn disabled_commands(&self) -> BTreeSet<String> {
        self.record
            .read(|c| c.disabled_commands.iter().cloned().collect())
            .await
    }

    /// Every key with its displayed value, in declaration order.
    pub async fn entries(&self) -> Vec<(String, String)> {
        let config = self.get().await;
        let Ok(Value::Object(map)) = serde_json::to_value(&config) else {
            return Vec::new();
        };
        let order = [
            "require_admin_for_birthday_remove",
            "require_admin_for_birthday_set",
            "allow_dm_commands",
            "max_catchup_messages",
            "disabled_commands",
        ];
        order
            .iter()
            .filter_map(|k| map.get(*k).map(|v| (k.to_string(), display(v))))
            .collect()
    }

    pub async fn value(&self, key: &str) -> Option<String> {
        self.entries()
            .await
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Change one key. The stored record only changes if the new value has
    /// the right type. Returns the displayed new value.
    pub async fn set(
        &self,
        key: &str,
        raw: &str,
        changed_by: &str,
    ) -> Result<String, ConfigUpdateError> {
        let current = self.get().await;
        let Ok(Value::Object(mut map)) = serde_json::to_value(&current) else {
            return Err(ConfigUpdateError::UnknownKey(key.to_string()));
        };
        if !map.contains_key(key) {
            return Err(ConfigUpdateError::UnknownKey(key.to_string()));
        }

        let value = if key == "disabled_commands" {
            command_list(raw)
        } else {
            parse_value(raw)
        };
        if key == "max_catchup_messages"
            && !value
                .as_u64()
                .is_some_and(|n| (1..=MAX_CATCHUP_LIMIT).contains(&n))
        {
            return Err(ConfigUpdateError::InvalidValue {
                key: key.to_string(),
                reason: format!("expected a number between 1 and {MAX_CATCHUP_LIMIT}"),
            });
        }

        let shown = display(&value);
        map.insert(key.to_string(), value);
        let next: BotConfig = serde_json::from_value(Value::Object(map)).map_err(|e| {
            ConfigUpdateError::InvalidValue {
                key: key.to_string(),
                reason: e.to_string(),
            }
        })?;

        self.record.update(|c| *c = next).await?;
        info!(key, value = %shown, changed_by, "Bot configuration updated");
        Ok(shown)
    }

    pub async fn reload(&self) -> Result<(), MemoryError> {
        self.record.reload().await
    }
}
