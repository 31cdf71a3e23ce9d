//! Provider-agnostic completion types and the `LlmProvider` trait.

use async_trait::async_trait;

use crate::error::LlmError;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

/// A single message in a completion request.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Shape the model output must take.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OutputShape {
    /// Free-form text.
    #[default]
    Text,
    /// Exactly one of the listed labels, nothing else.
    OneOf(Vec<String>),
}

impl OutputShape {
    pub fn one_of<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::OneOf(labels.into_iter().map(Into::into).collect())
    }

    /// Instruction appended to the system prompt for constrained shapes.
    pub fn instruction(&self) -> Option<String> {
        match self {
            Self::Text => None,
            Self::OneOf(labels) => Some(format!(
                "Respond with exactly one of the following values and nothing else: {}",
                labels.join(", ")
            )),
        }
    }

    /// Check a raw model output against the shape, returning the normalized value.
    pub fn validate(&self, raw: &str) -> Option<String> {
        match self {
            Self::Text => Some(raw.to_string()),
            Self::OneOf(labels) => {
                let cleaned = raw
                    .trim()
                    .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.')
                    .to_lowercase();
                labels.iter().find(|l| l.to_lowercase() == cleaned).cloned()
            }
        }
    }
}

/// A completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub output: OutputShape,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            output: OutputShape::Text,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_output(mut self, output: OutputShape) -> Self {
        self.output = output;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Concatenated system content, if any.
    pub fn system_prompt(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }
}

/// A completion response. Token usage is logged by the adapter, not returned.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
}

/// A chat-completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Backend label (`openai`, `anthropic`), used in errors and logs.
    fn provider_name(&self) -> &str;

    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    /// Run a single completion.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}
