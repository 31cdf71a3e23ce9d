//! Error types for Group Assist.

/// Payload markers that identify a moderation rejection from the model provider.
const CONTENT_FILTER_MARKERS: [&str; 2] = ["content_filter", "responsibleaipolicyviolation"];

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Transport (chat gateway) errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Failed to resolve own identity on channel {name}: {reason}")]
    IdentityUnavailable { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

impl LlmError {
    /// Whether the provider rejected the call for content-policy reasons.
    ///
    /// Providers do not report moderation as a distinct status, so this
    /// inspects the error payload for the known markers, case-insensitively.
    pub fn is_content_filtered(&self) -> bool {
        let payload = match self {
            Self::RequestFailed { reason, .. } | Self::InvalidResponse { reason, .. } => {
                reason.to_lowercase()
            }
            _ => return false,
        };
        CONTENT_FILTER_MARKERS
            .iter()
            .any(|marker| payload.contains(marker))
    }
}

/// Embedding provider errors.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding request to {provider} failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider returned {got} embeddings for a batch of {expected}")]
    CountMismatch { expected: usize, got: usize },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_filter_marker_detected_case_insensitively() {
        let err = LlmError::RequestFailed {
            provider: "openai".into(),
            reason: r#"{"error":{"code":"Content_Filter","message":"blocked"}}"#.into(),
        };
        assert!(err.is_content_filtered());

        let err = LlmError::RequestFailed {
            provider: "azure".into(),
            reason: "inner error: ResponsibleAIPolicyViolation".into(),
        };
        assert!(err.is_content_filtered());
    }

    #[test]
    fn ordinary_failures_are_not_content_filtered() {
        let err = LlmError::RequestFailed {
            provider: "openai".into(),
            reason: "connection reset by peer".into(),
        };
        assert!(!err.is_content_filtered());
        assert!(
            !LlmError::AuthFailed {
                provider: "openai".into()
            }
            .is_content_filtered()
        );
    }
}
