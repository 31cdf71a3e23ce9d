//! Configuration types.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};

/// Default cron schedule for the managed-group summary job (every six hours).
pub const DEFAULT_SUMMARY_SCHEDULE: &str = "0 0 */6 * * *";

/// Default cron schedule for knowledge topic ingestion (daily, 03:00 UTC).
pub const DEFAULT_TOPIC_SCHEDULE: &str = "0 0 3 * * *";

/// Chat gateway connection settings.
#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    /// Base URL of the HTTP gateway, e.g. `http://localhost:3000`.
    pub host: String,
    pub basic_auth_user: Option<String>,
    pub basic_auth_password: Option<SecretString>,
}

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    pub whatsapp: WhatsAppConfig,
    /// Chat model used for routing and summaries. Always explicit.
    pub chat: LlmConfig,
    /// OpenAI-compatible key for the embedding provider.
    pub embedding_api_key: SecretString,
    /// Model every knowledge topic is embedded with.
    pub embedding_model: String,
    pub summary_schedule: cron::Schedule,
    pub topic_schedule: cron::Schedule,
    pub log_level: String,
}

impl Settings {
    /// Build settings from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup. `from_env` passes the process
    /// environment; tests pass a map.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        let api_key = required("LLM_API_KEY")?;

        let backend = match var("LLM_BACKEND", "openai").to_lowercase().as_str() {
            "openai" => LlmBackend::OpenAi,
            "anthropic" => LlmBackend::Anthropic,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "LLM_BACKEND".into(),
                    message: format!("unknown backend '{other}' (expected openai or anthropic)"),
                });
            }
        };

        let chat = LlmConfig {
            backend,
            api_key: SecretString::from(api_key.clone()),
            model: var("CHAT_MODEL_NAME", backend.default_model()),
        };

        let port: u16 = match lookup("PORT") {
            Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
                key: "PORT".into(),
                message: format!("{e}"),
            })?,
            None => 5001,
        };

        Ok(Self {
            host: var("HOST", "0.0.0.0"),
            port,
            database_path: PathBuf::from(var("DATABASE_PATH", "./data/group-assist.db")),
            whatsapp: WhatsAppConfig {
                host: required("WHATSAPP_HOST")?,
                basic_auth_user: lookup("WHATSAPP_BASIC_AUTH_USER"),
                basic_auth_password: lookup("WHATSAPP_BASIC_AUTH_PASSWORD").map(SecretString::from),
            },
            chat,
            embedding_api_key: SecretString::from(lookup("EMBEDDING_API_KEY").unwrap_or(api_key)),
            embedding_model: var("EMBEDDING_MODEL_NAME", "text-embedding-3-large"),
            summary_schedule: parse_schedule(
                "SUMMARY_SCHEDULE",
                &var("SUMMARY_SCHEDULE", DEFAULT_SUMMARY_SCHEDULE),
            )?,
            topic_schedule: parse_schedule(
                "TOPIC_SCHEDULE",
                &var("TOPIC_SCHEDULE", DEFAULT_TOPIC_SCHEDULE),
            )?,
            log_level: var("LOG_LEVEL", "info"),
        })
    }

    /// Socket address the webhook server binds to.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError::InvalidValue {
                key: "HOST".into(),
                message: format!("{e}"),
            })
    }
}

fn parse_schedule(key: &str, raw: &str) -> Result<cron::Schedule, ConfigError> {
    cron::Schedule::from_str(raw).map_err(|e| ConfigError::InvalidValue {
        key: key.into(),
        message: format!("invalid cron expression '{raw}': {e}"),
    })
}
