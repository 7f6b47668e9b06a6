use std::path::Path;
use std::sync::{Arc, RwLock};

use figment::{
    providers::{Env, Format, Json},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WatchtowerError};

/// Top-level configuration document (watchtower.json + WATCHTOWER_* env
/// overrides, e.g. `WATCHTOWER_SERVER__PORT=8080` — `__` separates nesting
/// levels so snake_case keys survive).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchtowerConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub tools: ToolServerConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

impl Default for WatchtowerConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            security: SecurityConfig::default(),
            database: DatabaseConfig::default(),
            network: NetworkConfig::default(),
            model: ModelConfig::default(),
            ingest: IngestConfig::default(),
            retrieval: RetrievalConfig::default(),
            thresholds: ThresholdsConfig::default(),
            alerts: AlertsConfig::default(),
            tools: ToolServerConfig::default(),
            telegram: TelegramConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Allow self-service registration through POST /api/register.
    #[serde(default = "bool_true")]
    pub registration_open: bool,
    #[serde(default = "default_min_password_len")]
    pub min_password_len: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            registration_open: true,
            min_password_len: default_min_password_len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_archive_path")]
    pub archive_path: String,
    #[serde(default = "default_sessions_path")]
    pub sessions_path: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            archive_path: default_archive_path(),
            sessions_path: default_sessions_path(),
            log_dir: default_log_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Name of the Wazuh manager container the ingest pipeline execs into.
    #[serde(default = "default_container_name")]
    pub container_name: String,
    /// Path of archives.json inside the container.
    #[serde(default = "default_archives_path")]
    pub archives_path: String,
    /// Wazuh manager REST API base URL (consumed by external tooling only).
    #[serde(default = "default_manager_api_url")]
    pub manager_api_url: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            container_name: default_container_name(),
            archives_path: default_archives_path(),
            manager_api_url: default_manager_api_url(),
        }
    }
}

/// OpenAI-compatible chat-completions endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_base_url")]
    pub base_url: String,
    #[serde(default = "default_model_api_key")]
    pub api_key: String,
    #[serde(default = "default_model_name")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_model_base_url(),
            api_key: default_model_api_key(),
            model: default_model_name(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Seconds between tail polls.
    #[serde(default = "default_ingest_interval")]
    pub interval_secs: u64,
    /// Lines read per poll — sized so a typical 5-second burst fits.
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_ingest_interval(),
            tail_lines: default_tail_lines(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_vector_dim")]
    pub vector_dim: usize,
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_days_range")]
    pub default_days_range: i64,
    /// Most-recent events considered when (re)building the semantic index.
    #[serde(default = "default_index_window")]
    pub index_window: usize,
    /// Approximate token budget for the CAG context block.
    #[serde(default = "default_cag_token_budget")]
    pub cag_token_budget: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            embedding_model: default_embedding_model(),
            vector_dim: default_vector_dim(),
            default_k: default_k(),
            default_days_range: default_days_range(),
            index_window: default_index_window(),
            cag_token_budget: default_cag_token_budget(),
        }
    }
}

/// Rule-level cut-offs for the alert severity bands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    #[serde(default = "default_critical_level")]
    pub critical_level: i64,
    #[serde(default = "default_high_level")]
    pub high_level: i64,
    #[serde(default = "default_medium_level")]
    pub medium_level: i64,
    #[serde(default = "default_subscriber_cap")]
    pub subscriber_cap: usize,
    /// Delivered-id set size that triggers eviction.
    #[serde(default = "default_delivered_retention")]
    pub delivered_retention: usize,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            critical_level: default_critical_level(),
            high_level: default_high_level(),
            medium_level: default_medium_level(),
            subscriber_cap: default_subscriber_cap(),
            delivered_retention: default_delivered_retention(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_alert_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_alerts_per_hour")]
    pub max_per_hour: u32,
    #[serde(default = "default_alert_cooldown")]
    pub cooldown_secs: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_alert_poll_interval(),
            max_per_hour: default_max_alerts_per_hour(),
            cooldown_secs: default_alert_cooldown(),
        }
    }
}

/// How the chat pipeline spawns the tool-server child process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    #[serde(default = "default_tool_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for ToolServerConfig {
    fn default() -> Self {
        Self {
            command: default_tool_command(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    /// Bot token; the Telegram surface is disabled when unset.
    pub bot_token: Option<String>,
}

fn bool_true() -> bool {
    true
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8787
}
fn default_min_password_len() -> usize {
    8
}
fn default_archive_path() -> String {
    "./data/wazuh_archives.db".to_string()
}
fn default_sessions_path() -> String {
    "./data/chat_history.db".to_string()
}
fn default_log_dir() -> String {
    "./logs".to_string()
}
fn default_container_name() -> String {
    "single-node-wazuh.manager-1".to_string()
}
fn default_archives_path() -> String {
    "/var/ossec/logs/archives/archives.json".to_string()
}
fn default_manager_api_url() -> String {
    "https://localhost:55000".to_string()
}
fn default_model_base_url() -> String {
    "http://127.0.0.1:1234".to_string()
}
fn default_model_api_key() -> String {
    "lm-studio".to_string()
}
fn default_model_name() -> String {
    "qwen/qwen3-1.7b".to_string()
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_temperature() -> f64 {
    0.3
}
fn default_ingest_interval() -> u64 {
    5
}
fn default_tail_lines() -> usize {
    50
}
fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}
fn default_vector_dim() -> usize {
    384
}
fn default_k() -> usize {
    10
}
fn default_days_range() -> i64 {
    7
}
fn default_index_window() -> usize {
    1000
}
fn default_cag_token_budget() -> usize {
    24_000
}
fn default_critical_level() -> i64 {
    8
}
fn default_high_level() -> i64 {
    6
}
fn default_medium_level() -> i64 {
    5
}
fn default_subscriber_cap() -> usize {
    64
}
fn default_delivered_retention() -> usize {
    1000
}
fn default_alert_poll_interval() -> u64 {
    10
}
fn default_max_alerts_per_hour() -> u32 {
    20
}
fn default_alert_cooldown() -> u64 {
    300
}
fn default_tool_command() -> String {
    "watchtower-tools".to_string()
}

impl WatchtowerConfig {
    /// Load the JSON config document with WATCHTOWER_* env overrides.
    /// A missing file yields the built-in defaults; a malformed one is an error.
    pub fn load(path: &str) -> Result<Self> {
        Figment::new()
            .merge(Json::file(path))
            .merge(Env::prefixed("WATCHTOWER_").split("__"))
            .extract()
            .map_err(|e| WatchtowerError::Config(e.to_string()))
    }

    /// Serialize and write the document back to `path` (pretty-printed so
    /// operators can still edit it by hand).
    pub fn save(&self, path: &str) -> Result<()> {
        if let Some(dir) = Path::new(path).parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| WatchtowerError::Config(e.to_string()))?;
        }
        let body = serde_json::to_string_pretty(self)
            .map_err(|e| WatchtowerError::Config(e.to_string()))?;
        std::fs::write(path, body).map_err(|e| WatchtowerError::Config(e.to_string()))
    }
}

/// Atomically swappable configuration handle.
///
/// Components hold a clone and call `current()` at their boundaries (the
/// alert monitor re-reads thresholds every tick, which is what makes those
/// values hot-reloadable). `replace()` swaps the whole document; readers see
/// either the old or the new snapshot, never a mix.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<WatchtowerConfig>>>,
}

impl ConfigHandle {
    pub fn new(config: WatchtowerConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn current(&self) -> Arc<WatchtowerConfig> {
        self.inner.read().unwrap().clone()
    }

    pub fn replace(&self, config: WatchtowerConfig) {
        *self.inner.write().unwrap() = Arc::new(config);
    }
}
