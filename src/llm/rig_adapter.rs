//! Bridge from rig-core's `CompletionModel` to our `LlmProvider` trait.

use async_trait::async_trait;
use rig::completion::{CompletionError, CompletionModel};
use rig::message::{AssistantContent, Message};

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider, Role};

/// Used when the caller does not cap output; some providers require a value.
const DEFAULT_MAX_TOKENS: u64 = 1024;

/// Lowercased payload fragments that identify a rejected credential.
const AUTH_FAILURE_MARKERS: [&str; 5] = [
    "invalid_api_key",
    "authentication_error",
    "incorrect api key",
    "invalid x-api-key",
    "unauthorized",
];

/// Wraps any rig completion model.
pub struct RigAdapter<M> {
    model: M,
    provider: String,
    model_name: String,
}

impl<M> RigAdapter<M> {
    pub fn new(model: M, provider: &str, model_name: &str) -> Self {
        Self {
            model,
            provider: provider.to_string(),
            model_name: model_name.to_string(),
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut preamble = request.system_prompt().unwrap_or_default();
        if let Some(instruction) = request.output.instruction() {
            if !preamble.is_empty() {
                preamble.push_str("\n\n");
            }
            preamble.push_str(&instruction);
        }

        let mut turns: Vec<Message> = request
            .messages
            .iter()
            .filter_map(|m| match m.role {
                Role::System => None,
                Role::User => Some(Message::user(m.content.clone())),
            })
            .collect();
        let prompt = turns.pop().ok_or_else(|| LlmError::InvalidResponse {
            provider: self.provider.clone(),
            reason: "completion request has no user content".into(),
        })?;

        let mut builder = self
            .model
            .completion_request(prompt)
            .messages(turns)
            .max_tokens(request.max_tokens.map(u64::from).unwrap_or(DEFAULT_MAX_TOKENS));
        if !preamble.is_empty() {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_completion_error(&self.provider, e))?;

        let text: String = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        let content = request
            .output
            .validate(&text)
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: self.provider.clone(),
                reason: format!("output '{text}' does not match the requested shape"),
            })?;

        tracing::debug!(
            provider = %self.provider,
            model = %self.model_name,
            input_tokens = u32::try_from(response.usage.input_tokens).unwrap_or(u32::MAX),
            output_tokens = u32::try_from(response.usage.output_tokens).unwrap_or(u32::MAX),
            "Completion finished"
        );

        Ok(CompletionResponse { content })
    }
}

/// Keep the provider payload intact so moderation markers survive.
/// Rejected credentials become `AuthFailed`, which is never retried.
fn map_completion_error(provider: &str, err: CompletionError) -> LlmError {
    let reason = match err {
        CompletionError::ResponseError(reason) => {
            return LlmError::InvalidResponse {
                provider: provider.to_string(),
                reason,
            };
        }
        other => other.to_string(),
    };

    let lowered = reason.to_lowercase();
    if AUTH_FAILURE_MARKERS.iter().any(|m| lowered.contains(m)) {
        tracing::debug!(provider, reason = %reason, "Provider rejected credentials");
        return LlmError::AuthFailed {
            provider: provider.to_string(),
        };
    }
    LlmError::RequestFailed {
        provider: provider.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::RetryPolicy;

    #[test]
    fn provider_error_payload_is_preserved() {
        let err = map_completion_error(
            "openai",
            CompletionError::ProviderError(
                r#"{"error":{"code":"content_filter","innererror":{"code":"ResponsibleAIPolicyViolation"}}}"#
                    .into(),
            ),
        );
        assert!(matches!(err, LlmError::RequestFailed { .. }));
        assert!(err.is_content_filtered());
    }

    #[test]
    fn response_error_maps_to_invalid_response() {
        let err = map_completion_error("openai", CompletionError::ResponseError("empty".into()));
        assert!(matches!(err, LlmError::InvalidResponse { .. }));
        assert!(!err.is_content_filtered());
    }

    #[test]
    fn rejected_api_key_maps_to_auth_failed_and_is_final() {
        let err = map_completion_error(
            "openai",
            CompletionError::ProviderError(
                r#"{"error":{"message":"Incorrect API key provided","code":"invalid_api_key"}}"#
                    .into(),
            ),
        );
        assert!(matches!(err, LlmError::AuthFailed { ref provider } if provider == "openai"));
        assert!(!RetryPolicy::is_retryable(&err));

        let err = map_completion_error(
            "anthropic",
            CompletionError::ProviderError(
                r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#
                    .into(),
            ),
        );
        assert!(matches!(err, LlmError::AuthFailed { .. }));
    }

    #[test]
    fn transient_provider_error_stays_retryable() {
        let err = map_completion_error(
            "openai",
            CompletionError::ProviderError("503 Service Unavailable: upstream overloaded".into()),
        );
        assert!(matches!(err, LlmError::RequestFailed { .. }));
        assert!(RetryPolicy::is_retryable(&err));
    }
}
