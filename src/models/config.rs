//! Configuration model loaded from external sources.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::{
    CONTENT_EXCERPT_CHARS, MAX_VERIFICATION_ATTEMPTS, NOTIFICATION_THRESHOLD,
    SIMILARITY_THRESHOLD, TOP_K,
};

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
/// Basic configuration shared across handlers.
pub struct ServerConfig {
    pub database_url: String,
    pub zmq_documents_pull: String,
    pub questions_path: PathBuf,
    pub topics_path: PathBuf,
    pub matching: MatchingConfig,
    pub verification: VerificationConfig,
    pub llm: LlmConfig,
    pub notifications: NotificationConfig,
    pub telegram: Option<TelegramConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_url: "app.db".to_string(),
            zmq_documents_pull: "tcp://127.0.0.1:5556".to_string(),
            questions_path: PathBuf::from("question_list.md"),
            topics_path: PathBuf::from("topic_list.md"),
            matching: MatchingConfig::default(),
            verification: VerificationConfig::default(),
            llm: LlmConfig::default(),
            notifications: NotificationConfig::default(),
            telegram: None,
        }
    }
}

impl ServerConfig {
    /// Layer `config/default.yaml`, the file named by `APP_CONFIG` and
    /// `APP__*` environment variables over the built-in defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder =
            Config::builder().add_source(File::with_name("config/default").required(false));

        if let Ok(path) = std::env::var("APP_CONFIG") {
            builder = builder.add_source(File::with_name(&path).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub content_excerpt_chars: usize,
    /// Documents processed concurrently within one batch.
    pub workers: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            top_k: TOP_K,
            similarity_threshold: SIMILARITY_THRESHOLD,
            content_excerpt_chars: CONTENT_EXCERPT_CHARS,
            workers: 1,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub max_attempts: u32,
    pub rate_limit_backoff_secs: u64,
    pub transient_backoff_secs: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_VERIFICATION_ATTEMPTS,
            rate_limit_backoff_secs: 30,
            transient_backoff_secs: 2,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Gemini,
    Ollama,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Ollama,
            model: "llama3.1:8b".to_string(),
            base_url: "http://localhost:11434".to_string(),
            api_key: None,
            timeout_secs: 60,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    #[default]
    Unsent,
    SinceCheckpoint,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub threshold: f32,
    pub interval_secs: u64,
    pub batch_limit: i64,
    /// Channel cap in UTF-16 code units, the way Telegram counts.
    pub max_message_chars: usize,
    pub mode: DispatchMode,
    pub lookback_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: NOTIFICATION_THRESHOLD,
            interval_secs: 300,
            batch_limit: 100,
            max_message_chars: 4096,
            mode: DispatchMode::Unsent,
            lookback_secs: 300,
        }
    }
}

impl NotificationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default = "default_telegram_base_url")]
    pub base_url: String,
}

fn default_telegram_base_url() -> String {
    "https://api.telegram.org".to_string()
}
