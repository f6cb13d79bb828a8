//! Configuration for the usher services.
//!
//! All settings live in a single JSON file at `~/.usher/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Explicit config file values
//! 2. Environment variables (USHER_* prefix, plus `OPENAI_API_KEY`)
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `USHER_TELEGRAM_TOKEN` → telegram.bot_token
//! - `USHER_GROUP_ID` → telegram.group_id
//! - `OPENAI_API_KEY` → openai.api_key
//! - `USHER_OPENAI_BASE_URL` → openai.base_url
//! - `USHER_DB_PATH` → storage.db_path
//! - `USHER_DAILY_REQUEST_LIMIT` → limits.daily_requests
//! - `USHER_WARNING_THRESHOLD` → limits.warning_threshold
//! - `USHER_MAX_FILE_BYTES` → limits.max_file_bytes
//! - `USHER_RUN_TIMEOUT` → timeouts.run_seconds
//! - `USHER_LOG_LEVEL` → observability.log_level

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".usher"),
        |dirs| dirs.home_dir().join(".usher"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Telegram Configuration
// ============================================================================

/// Telegram transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    /// Bot API token from @BotFather.
    #[serde(default)]
    pub bot_token: String,

    /// Chat id of the group users must belong to.
    /// Membership in this group gates every request.
    #[serde(default)]
    pub group_id: i64,
}

// ============================================================================
// OpenAI Configuration
// ============================================================================

/// Upstream provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// API key for the OpenAI API.
    #[serde(default)]
    pub api_key: String,

    /// Base URL, overridable for proxies and compatible servers.
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_openai_base_url(),
        }
    }
}

fn default_openai_base_url() -> String {
    "https://api.openai.com".into()
}

// ============================================================================
// Storage Configuration
// ============================================================================

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "usher.db".into()
}

// ============================================================================
// Limits Configuration
// ============================================================================

/// Admission-control limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Hard ceiling of requests per user per UTC day.
    #[serde(default = "default_daily_requests")]
    pub daily_requests: u32,

    /// Usage level at which replies start carrying a remaining-quota warning.
    /// Must be strictly below `daily_requests`.
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: u32,

    /// Largest file accepted from a user, in bytes.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            daily_requests: default_daily_requests(),
            warning_threshold: default_warning_threshold(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_daily_requests() -> u32 {
    100
}

fn default_warning_threshold() -> u32 {
    80
}

fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}

// ============================================================================
// Timeouts Configuration
// ============================================================================

/// Polling budgets for asynchronous upstream work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Seconds to wait for a run to complete before reporting a timeout.
    /// With a one-second poll interval this is also the attempt count.
    #[serde(default = "default_run_seconds")]
    pub run_seconds: u64,

    /// Seconds to wait for file-analysis runs, which can take much longer.
    #[serde(default = "default_file_seconds")]
    pub file_seconds: u64,

    /// Milliseconds between status polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Attempts spent waiting out a leftover run before cancelling it.
    #[serde(default = "default_reconcile_attempts")]
    pub reconcile_attempts: u32,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            run_seconds: default_run_seconds(),
            file_seconds: default_file_seconds(),
            poll_interval_ms: default_poll_interval_ms(),
            reconcile_attempts: default_reconcile_attempts(),
        }
    }
}

fn default_run_seconds() -> u64 {
    120
}

fn default_file_seconds() -> u64 {
    600
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_reconcile_attempts() -> u32 {
    60
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Base log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Output format: "pretty" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Assistant Catalog
// ============================================================================

/// One configured assistant.
///
/// `protocol` selects the upstream convention: `"threads"` for the
/// Assistants API (a `retrieval: true` entry always uses this protocol),
/// `"responses"` for the Responses API, which additionally needs `model`
/// and `instructions`. The core validates the combination at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantEntry {
    /// Stable identifier, also used in callback data.
    pub id: String,

    /// Display title shown to users.
    pub title: String,

    /// Emoji shown next to the title.
    #[serde(default)]
    pub emoji: String,

    /// One-line description for the picker keyboard.
    #[serde(default)]
    pub description: String,

    /// Upstream protocol: "threads" or "responses".
    pub protocol: String,

    /// Whether the assistant has a knowledge base attached (threads only).
    #[serde(default)]
    pub retrieval: bool,

    /// Model name for responses-protocol assistants.
    #[serde(default)]
    pub model: Option<String>,

    /// System instructions for responses-protocol assistants.
    #[serde(default)]
    pub instructions: Option<String>,
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration for all usher services.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Telegram transport settings
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Upstream provider settings
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Persistence settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Admission-control limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Polling budgets
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Logging settings
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Assistant catalog
    #[serde(default)]
    pub assistants: Vec<AssistantEntry>,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("USHER_TELEGRAM_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Ok(group) = std::env::var("USHER_GROUP_ID") {
            if let Ok(id) = group.parse() {
                self.telegram.group_id = id;
            }
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.openai.api_key = key;
        }
        if let Ok(url) = std::env::var("USHER_OPENAI_BASE_URL") {
            self.openai.base_url = url;
        }
        if let Ok(path) = std::env::var("USHER_DB_PATH") {
            self.storage.db_path = path;
        }
        if let Ok(limit) = std::env::var("USHER_DAILY_REQUEST_LIMIT") {
            if let Ok(n) = limit.parse() {
                self.limits.daily_requests = n;
            }
        }
        if let Ok(threshold) = std::env::var("USHER_WARNING_THRESHOLD") {
            if let Ok(n) = threshold.parse() {
                self.limits.warning_threshold = n;
            }
        }
        if let Ok(bytes) = std::env::var("USHER_MAX_FILE_BYTES") {
            if let Ok(n) = bytes.parse() {
                self.limits.max_file_bytes = n;
            }
        }
        if let Ok(secs) = std::env::var("USHER_RUN_TIMEOUT") {
            if let Ok(n) = secs.parse() {
                self.timeouts.run_seconds = n;
            }
        }
        if let Ok(level) = std::env::var("USHER_LOG_LEVEL") {
            self.observability.log_level = level;
        }
    }

    /// Check that the configuration is complete enough to start the bot.
    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.is_empty() {
            bail!("telegram.bot_token is not set (or USHER_TELEGRAM_TOKEN)");
        }
        if self.telegram.group_id == 0 {
            bail!("telegram.group_id is not set (or USHER_GROUP_ID)");
        }
        if self.openai.api_key.is_empty() {
            bail!("openai.api_key is not set (or OPENAI_API_KEY)");
        }
        if self.limits.warning_threshold >= self.limits.daily_requests {
            bail!(
                "limits.warning_threshold ({}) must be below limits.daily_requests ({})",
                self.limits.warning_threshold,
                self.limits.daily_requests
            );
        }
        if self.assistants.is_empty() {
            bail!("no assistants configured");
        }
        Ok(())
    }
}
