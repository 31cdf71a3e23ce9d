//! Model access for routing, summaries, and topic extraction.
//!
//! Chat completions go through [`RigAdapter`], which hides the rig-core
//! client behind [`LlmProvider`]. Topic embeddings go through
//! [`RigEmbedder`] and the batching in [`embed_texts`].

pub mod embeddings;
pub mod provider;
pub mod retry;
mod rig_adapter;

pub use embeddings::{EMBEDDING_BATCH_SIZE, EmbeddingProvider, RigEmbedder, embed_texts};
pub use provider::*;
pub use retry::RetryPolicy;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::error::LlmError;

/// Chat backend selected by `LLM_BACKEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

impl LlmBackend {
    /// Label carried by every provider built for this backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
        }
    }

    /// Model used when `CHAT_MODEL_NAME` is not set.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Anthropic => "claude-3-5-sonnet-latest",
            Self::OpenAi => "gpt-4o",
        }
    }
}

/// Chat model settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
}

/// Build the chat provider for `config`. Credentials are checked on first use.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let label = config.backend.as_str();
    let client_failed = |e: &dyn std::fmt::Display| LlmError::RequestFailed {
        provider: label.to_string(),
        reason: format!("Failed to create {label} client: {e}"),
    };

    let provider: Arc<dyn LlmProvider> = match config.backend {
        LlmBackend::Anthropic => {
            use rig::providers::anthropic;
            let client: rig::client::Client<anthropic::client::AnthropicExt> =
                anthropic::Client::new(config.api_key.expose_secret())
                    .map_err(|e| client_failed(&e))?;
            Arc::new(RigAdapter::new(
                client.completion_model(&config.model),
                label,
                &config.model,
            ))
        }
        LlmBackend::OpenAi => {
            use rig::providers::openai;
            let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
                openai::Client::new(config.api_key.expose_secret())
                    .map_err(|e| client_failed(&e))?;
            Arc::new(RigAdapter::new(
                client.completion_model(&config.model),
                label,
                &config.model,
            ))
        }
    };

    tracing::info!(provider = label, model = %config.model, "Chat model ready");
    Ok(provider)
}
