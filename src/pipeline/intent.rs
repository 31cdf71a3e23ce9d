//! Intent classification: one constrained model call per message.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, OutputShape};
use crate::pipeline::types::Intent;
use crate::prompts;

/// The answer is a single label.
const INTENT_MAX_TOKENS: u32 = 16;

const INTENT_TEMPERATURE: f32 = 0.0;

/// Characters of the message shown in failure logs.
const LOG_PREVIEW_CHARS: usize = 80;

/// Maps free text to an [`Intent`]. Never fails: any model error is `Other`.
pub struct IntentClassifier {
    llm: Arc<dyn LlmProvider>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    pub async fn classify(&self, text: &str) -> Intent {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(prompts::intent_system_prompt()),
            ChatMessage::user(text),
        ])
        .with_output(OutputShape::one_of(Intent::ALL.map(|i| i.as_str())))
        .with_temperature(INTENT_TEMPERATURE)
        .with_max_tokens(INTENT_MAX_TOKENS);

        let response = match self.llm.complete(request).await {
            Ok(response) => response,
            Err(e) if e.is_content_filtered() => {
                warn!(
                    message = %preview(text),
                    "Intent classification blocked by content filter, falling back to other"
                );
                debug!(error = %e, "Content filter details");
                return Intent::Other;
            }
            Err(e) => {
                error!(
                    error = %e,
                    provider = self.llm.provider_name(),
                    model = self.llm.model_name(),
                    message = %preview(text),
                    "Intent classification failed, falling back to other"
                );
                return Intent::Other;
            }
        };

        match response.content.parse::<Intent>() {
            Ok(intent) => {
                debug!(intent = %intent, "Classified message");
                intent
            }
            Err(e) => {
                warn!(error = %e, "Unrecognized intent label, falling back to other");
                Intent::Other
            }
        }
    }
}

fn preview(text: &str) -> String {
    text.chars().take(LOG_PREVIEW_CHARS).collect()
}
