//! Configuration loading, validation, and management for Seedkeeper.
//!
//! Loads configuration from `~/.seedkeeper/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Slack on top of backend and fetch time when sizing the visibility window.
pub const ITEM_MARGIN_SECS: u64 = 10;

/// The root configuration structure.
///
/// Maps directly to `~/.seedkeeper/config.toml`.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Language-model backend
    #[serde(default)]
    pub backend: BackendConfig,

    /// Queue / key-value / pub-sub broker
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Tiered memory store
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Perspective corpus
    #[serde(default)]
    pub perspectives: PerspectiveConfig,

    /// Worker process
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Gateway process
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Per-command rate limits
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Admin bootstrap list
    #[serde(default)]
    pub admins: AdminConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("backend", &self.backend)
            .field("broker", &self.broker)
            .field("memory", &self.memory)
            .field("perspectives", &self.perspectives)
            .field("worker", &self.worker)
            .field("gateway", &self.gateway)
            .field("rate_limits", &self.rate_limits)
            .field("admins", &self.admins)
            .finish()
    }
}

fn default_true() -> bool {
    true
}

// ── Backend ────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_backend_url")]
    pub base_url: String,

    #[serde(default = "default_deep_model")]
    pub deep_model: String,

    #[serde(default = "default_economical_model")]
    pub economical_model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Hard timeout for one backend call
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

fn default_backend_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_deep_model() -> String {
    "claude-sonnet-4-5-20250929".into()
}
fn default_economical_model() -> String {
    "claude-haiku-4-5-20251001".into()
}
fn default_max_tokens() -> u32 {
    800
}
fn default_temperature() -> f32 {
    1.0
}
fn default_backend_timeout() -> u64 {
    60
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_backend_url(),
            deep_model: default_deep_model(),
            economical_model: default_economical_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_backend_timeout(),
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("deep_model", &self.deep_model)
            .field("economical_model", &self.economical_model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ── Broker ─────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Where clients reach the broker service
    #[serde(default = "default_broker_url")]
    pub url: String,

    /// Shared bearer token; `None` disables authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Bind address of the broker service
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    #[serde(default = "default_work_queue")]
    pub work_queue: String,

    #[serde(default = "default_response_channel")]
    pub response_channel: String,

    #[serde(default = "default_heartbeat_channel")]
    pub heartbeat_channel: String,

    /// How long a claimed item stays hidden before it is redelivered
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
}

fn default_broker_url() -> String {
    "http://127.0.0.1:6390".into()
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_broker_port() -> u16 {
    6390
}
fn default_work_queue() -> String {
    "seedkeeper:commands".into()
}
fn default_response_channel() -> String {
    "seedkeeper:responses".into()
}
fn default_heartbeat_channel() -> String {
    "seedkeeper:heartbeat".into()
}
fn default_visibility_timeout() -> u64 {
    180
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            token: None,
            host: default_host(),
            port: default_broker_port(),
            work_queue: default_work_queue(),
            response_channel: default_response_channel(),
            heartbeat_channel: default_heartbeat_channel(),
            visibility_timeout_secs: default_visibility_timeout(),
        }
    }
}

impl BrokerConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("url", &self.url)
            .field("token", &redact(&self.token))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("work_queue", &self.work_queue)
            .field("response_channel", &self.response_channel)
            .field("heartbeat_channel", &self.heartbeat_channel)
            .field("visibility_timeout_secs", &self.visibility_timeout_secs)
            .finish()
    }
}

// ── Memory ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Root for durable records (memory logs, admins, bot config, birthdays)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Maximum turns kept per user in the durable log
    #[serde(default = "default_durable_cap")]
    pub durable_cap: usize,

    /// Longer turn texts are truncated before storage
    #[serde(default = "default_max_turn_chars")]
    pub max_turn_chars: usize,

    /// TTL of shared medium-tier entries
    #[serde(default = "default_medium_ttl")]
    pub medium_ttl_secs: u64,

    /// Maximum conversations held in the in-process tier
    #[serde(default = "default_local_capacity")]
    pub local_capacity: usize,

    #[serde(default = "default_local_ttl")]
    pub local_ttl_secs: u64,

    /// Turns of history sent to the model per request
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Load durable records into the caches at worker start
    #[serde(default = "default_true")]
    pub warm_on_start: bool,
}

fn default_data_dir() -> PathBuf {
    AppConfig::config_dir().join("data")
}
fn default_durable_cap() -> usize {
    100
}
fn default_max_turn_chars() -> usize {
    2000
}
fn default_medium_ttl() -> u64 {
    3600
}
fn default_local_capacity() -> usize {
    256
}
fn default_local_ttl() -> u64 {
    1800
}
fn default_history_limit() -> usize {
    15
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            durable_cap: default_durable_cap(),
            max_turn_chars: default_max_turn_chars(),
            medium_ttl_secs: default_medium_ttl(),
            local_capacity: default_local_capacity(),
            local_ttl_secs: default_local_ttl(),
            history_limit: default_history_limit(),
            warm_on_start: true,
        }
    }
}

impl MemoryConfig {
    pub fn medium_ttl(&self) -> Duration {
        Duration::from_secs(self.medium_ttl_secs)
    }

    pub fn local_ttl(&self) -> Duration {
        Duration::from_secs(self.local_ttl_secs)
    }
}

// ── Perspectives ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerspectiveConfig {
    /// Bulk source fetched by `refresh`
    #[serde(default = "default_perspective_url")]
    pub source_url: String,

    /// Local copy of the bulk source, loaded at start
    #[serde(default = "default_perspective_cache")]
    pub cache_file: PathBuf,

    /// Extended fragments sampled per compilation
    #[serde(default = "default_sample_count")]
    pub sample_count: usize,

    /// Names of the curated core fragments
    #[serde(default = "default_core_names")]
    pub core: Vec<String>,
}

fn default_perspective_url() -> String {
    "https://lightward.com/views.txt".into()
}
fn default_perspective_cache() -> PathBuf {
    default_data_dir().join("views.txt")
}
fn default_sample_count() -> usize {
    8
}
fn default_core_names() -> Vec<String> {
    [
        "aliveness",
        "awareness",
        "double-consent",
        "emergency",
        "lightward",
        "presence",
        "three-body",
        "unknown",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for PerspectiveConfig {
    fn default() -> Self {
        Self {
            source_url: default_perspective_url(),
            cache_file: default_perspective_cache(),
            sample_count: default_sample_count(),
            core: default_core_names(),
        }
    }
}

// ── Worker ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Work items processed concurrently by one worker
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// TTL of the `worker:{id}` registration key
    #[serde(default = "default_heartbeat_ttl")]
    pub heartbeat_ttl_secs: u64,

    /// How long processed event ids are remembered
    #[serde(default = "default_dedup_ttl")]
    pub dedup_ttl_secs: u64,

    /// How long catch-up waits for the gateway to return history
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Command marker character
    #[serde(default = "default_command_prefix")]
    pub command_prefix: char,
}

fn default_concurrency() -> usize {
    8
}
fn default_heartbeat_interval() -> u64 {
    30
}
fn default_heartbeat_ttl() -> u64 {
    60
}
fn default_dedup_ttl() -> u64 {
    86_400
}
fn default_fetch_timeout() -> u64 {
    10
}
fn default_command_prefix() -> char {
    '!'
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_ttl_secs: default_heartbeat_ttl(),
            dedup_ttl_secs: default_dedup_ttl(),
            fetch_timeout_secs: default_fetch_timeout(),
            command_prefix: default_command_prefix(),
        }
    }
}

// ── Gateway ────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Platform bot token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_token: Option<String>,

    #[serde(default = "default_host")]
    pub health_host: String,

    #[serde(default = "default_health_port")]
    pub health_port: u16,

    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial_ms: u64,

    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_ms: u64,

    /// Which platform connection to open ("discord" or "console")
    #[serde(default = "default_platform")]
    pub platform: String,
}

fn default_health_port() -> u16 {
    6391
}
fn default_reconnect_initial() -> u64 {
    500
}
fn default_reconnect_max() -> u64 {
    30_000
}
fn default_platform() -> String {
    "discord".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            platform_token: None,
            health_host: default_host(),
            health_port: default_health_port(),
            reconnect_initial_ms: default_reconnect_initial(),
            reconnect_max_ms: default_reconnect_max(),
            platform: default_platform(),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("platform_token", &redact(&self.platform_token))
            .field("health_host", &self.health_host)
            .field("health_port", &self.health_port)
            .field("reconnect_initial_ms", &self.reconnect_initial_ms)
            .field("reconnect_max_ms", &self.reconnect_max_ms)
            .field("platform", &self.platform)
            .finish()
    }
}

// ── Rate limits ────────────────────────────────────────────────

/// One sliding-window rule set for a command class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_minute: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_hour: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_day: Option<usize>,

    /// Minimum gap between two calls
    #[serde(default)]
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_catchup_limit")]
    pub catchup: RateLimitRule,

    #[serde(default = "default_per_minute_limit")]
    pub conversation: RateLimitRule,

    #[serde(default = "default_per_minute_limit")]
    pub garden: RateLimitRule,

    #[serde(default = "default_birthday_limit")]
    pub birthday: RateLimitRule,
}

fn default_catchup_limit() -> RateLimitRule {
    RateLimitRule {
        per_minute: None,
        per_hour: Some(10),
        per_day: Some(50),
        cooldown_secs: 10,
    }
}
fn default_per_minute_limit() -> RateLimitRule {
    RateLimitRule {
        per_minute: Some(10),
        per_hour: None,
        per_day: None,
        cooldown_secs: 0,
    }
}
fn default_birthday_limit() -> RateLimitRule {
    RateLimitRule {
        per_minute: None,
        per_hour: Some(20),
        per_day: None,
        cooldown_secs: 2,
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            catchup: default_catchup_limit(),
            conversation: default_per_minute_limit(),
            garden: default_per_minute_limit(),
            birthday: default_birthday_limit(),
        }
    }
}

// ── Admins ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// User ids that are always admins, regardless of the stored list
    #[serde(default)]
    pub bootstrap: Vec<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.seedkeeper/config.toml),
    /// then apply environment overrides:
    /// - `ANTHROPIC_API_KEY`, `SEEDKEEPER_TEMPERATURE`
    /// - `SEEDKEEPER_BROKER_URL`, `SEEDKEEPER_BROKER_TOKEN`
    /// - `SEEDKEEPER_DATA_DIR`
    /// - `DISCORD_BOT_TOKEN`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (highest priority).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("ANTHROPIC_API_KEY") {
            self.backend.api_key = Some(key);
        }
        if let Some(temp) = lookup("SEEDKEEPER_TEMPERATURE").and_then(|t| t.parse().ok()) {
            self.backend.temperature = temp;
        }
        if let Some(url) = lookup("SEEDKEEPER_BROKER_URL") {
            self.broker.url = url;
        }
        if let Some(token) = lookup("SEEDKEEPER_BROKER_TOKEN") {
            self.broker.token = Some(token);
        }
        if let Some(dir) = lookup("SEEDKEEPER_DATA_DIR") {
            let dir = PathBuf::from(dir);
            // Keep the perspective cache beside the data it belongs with.
            if self.perspectives.cache_file == default_perspective_cache() {
                self.perspectives.cache_file = dir.join("views.txt");
            }
            self.memory.data_dir = dir;
        }
        if let Some(token) = lookup("DISCORD_BOT_TOKEN") {
            self.gateway.platform_token = Some(token);
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".seedkeeper")
    }

    /// Longest a worker may spend on one item: a backend call plus its
    /// fallback attempt, a catchup history fetch, and slack for memory and
    /// publishing.
    pub fn longest_item_secs(&self) -> u64 {
        2 * self.backend.timeout_secs + self.worker.fetch_timeout_secs + ITEM_MARGIN_SECS
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.backend.temperature) {
            return Err(ConfigError::ValidationError(
                "backend.temperature must be between 0.0 and 1.0".into(),
            ));
        }
        if self.backend.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "backend.timeout_secs must be > 0".into(),
            ));
        }
        if self.memory.durable_cap == 0 || self.memory.local_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "memory.durable_cap and memory.local_capacity must be > 0".into(),
            ));
        }
        if self.worker.concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "worker.concurrency must be > 0".into(),
            ));
        }
        let longest_item = self.longest_item_secs();
        if self.broker.visibility_timeout_secs <= longest_item {
            return Err(ConfigError::ValidationError(format!(
                "broker.visibility_timeout_secs must exceed {longest_item} \
                 (two backend attempts, one history fetch, and {ITEM_MARGIN_SECS}s of slack)"
            )));
        }
        if !matches!(self.gateway.platform.as_str(), "discord" | "console") {
            return Err(ConfigError::ValidationError(format!(
                "gateway.platform must be \"discord\" or \"console\", got \"{}\"",
                self.gateway.platform
            )));
        }
        if self.gateway.reconnect_initial_ms > self.gateway.reconnect_max_ms {
            return Err(ConfigError::ValidationError(
                "gateway.reconnect_initial_ms must not exceed reconnect_max_ms".into(),
            ));
        }
        Ok(())
    }

    /// Check if a backend API key is available.
    pub fn has_api_key(&self) -> bool {
        self.backend.api_key.is_some()
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.broker.work_queue, "seedkeeper:commands");
        assert_eq!(config.memory.durable_cap, 100);
        assert_eq!(config.perspectives.core.len(), 8);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.backend.deep_model, config.backend.deep_model);
        assert_eq!(parsed.rate_limits.catchup, config.rate_limits.catchup);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.backend.temperature = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn visibility_must_outlast_the_longest_item() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_ok());

        // Two 60 s backend attempts plus a 10 s fetch overrun 120 s.
        config.broker.visibility_timeout_secs = 120;
        assert_eq!(config.longest_item_secs(), 140);
        assert!(config.validate().is_err());

        config.broker.visibility_timeout_secs = 141;
        assert!(config.validate().is_ok());

        config.worker.fetch_timeout_secs = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.broker.port, 6390);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "[memory]\ndurable_cap = 25\n\n[worker]\nconcurrency = 2").unwrap();

        let config = AppConfig::load_from(tmp.path()).unwrap();
        assert_eq!(config.memory.durable_cap, 25);
        assert_eq!(config.worker.concurrency, 2);
        assert_eq!(config.memory.medium_ttl_secs, 3600);
        assert_eq!(config.worker.command_prefix, '!');
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("ANTHROPIC_API_KEY", "sk-ant-test"),
            ("SEEDKEEPER_BROKER_URL", "http://broker:6390"),
            ("SEEDKEEPER_DATA_DIR", "/srv/seedkeeper"),
            ("SEEDKEEPER_TEMPERATURE", "0.4"),
        ]);
        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert!(config.has_api_key());
        assert_eq!(config.broker.url, "http://broker:6390");
        assert_eq!(config.memory.data_dir, PathBuf::from("/srv/seedkeeper"));
        assert_eq!(
            config.perspectives.cache_file,
            PathBuf::from("/srv/seedkeeper/views.txt")
        );
        assert!((config.backend.temperature - 0.4).abs() < f32::EPSILON);
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig::default();
        config.backend.api_key = Some("sk-ant-secret".into());
        config.broker.token = Some("broker-secret".into());
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("sk-ant-secret"));
        assert!(!dbg.contains("broker-secret"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("seedkeeper:commands"));
        assert!(toml_str.contains("claude-haiku-4-5-20251001"));
    }
}
