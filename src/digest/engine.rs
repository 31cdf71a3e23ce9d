//! Scheduled summary for a single group.
//!
//! Flow: fetch unseen messages → generate (with retry) → send to the group
//! and its community groups → advance the watermark. The watermark only
//! moves after generation succeeds; delivery failures do not hold it back.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::channels::Outbox;
use crate::error::{Error, LlmError};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, RetryPolicy};
use crate::pipeline::types::Group;
use crate::prompts;
use crate::store::Database;

/// Unseen messages needed before a group is summarized.
pub const MIN_MESSAGES_FOR_SUMMARY: usize = 15;

/// What happened to one group in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    /// Below threshold; nothing sent, watermark untouched.
    NotEnoughMessages { count: usize },
    /// Generation failed after retries; watermark untouched.
    GenerationFailed,
    /// Summary generated and watermark advanced.
    Delivered { sent: usize, failed: usize },
}

pub struct GroupSummarizer {
    store: Arc<dyn Database>,
    outbox: Arc<Outbox>,
    llm: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
}

impl GroupSummarizer {
    pub fn new(
        store: Arc<dyn Database>,
        outbox: Arc<Outbox>,
        llm: Arc<dyn LlmProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            outbox,
            llm,
            retry,
        }
    }

    pub fn store(&self) -> &Arc<dyn Database> {
        &self.store
    }

    /// Run one summary cycle for `group`.
    ///
    /// Only identity and storage failures are returned; model and delivery
    /// failures are logged and reflected in the outcome.
    pub async fn summarize_group(&self, group: &Group) -> Result<SummaryOutcome, Error> {
        let me = self.outbox.self_identity().await?;
        let messages = self
            .store
            .group_messages_since(&group.group_jid, group.last_summary_sync, &me)
            .await?;

        if messages.len() < MIN_MESSAGES_FOR_SUMMARY {
            info!(
                group = %group.group_jid,
                count = messages.len(),
                threshold = MIN_MESSAGES_FOR_SUMMARY,
                "Not enough messages to summarize"
            );
            return Ok(SummaryOutcome::NotEnoughMessages {
                count: messages.len(),
            });
        }

        let request = CompletionRequest::new(vec![
            ChatMessage::system(prompts::group_summary_system_prompt(group.display_name())),
            ChatMessage::user(prompts::chat_to_text(&messages)),
        ]);

        let summary = match self.generate(request).await {
            Ok(summary) => summary,
            Err(e) if e.is_content_filtered() => {
                warn!(group = %group.group_jid, "Group summary blocked by content filter");
                debug!(error = %e, "Content filter details");
                return Ok(SummaryOutcome::GenerationFailed);
            }
            Err(e) => {
                error!(
                    error = %e,
                    group = %group.group_jid,
                    attempts = self.retry.max_attempts,
                    "Group summary generation failed"
                );
                return Ok(SummaryOutcome::GenerationFailed);
            }
        };

        let (sent, failed) = self.deliver(group, &summary).await;

        self.store
            .advance_summary_sync(&group.group_jid, Utc::now())
            .await?;

        info!(
            group = %group.group_jid,
            messages = messages.len(),
            sent,
            failed,
            "Group summary complete"
        );
        Ok(SummaryOutcome::Delivered { sent, failed })
    }

    async fn generate(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let llm = &self.llm;
        self.retry
            .run("group_summary", || {
                let request = request.clone();
                async move {
                    let response = llm.complete(request).await?;
                    let content = response.content.trim();
                    if content.is_empty() {
                        return Err(LlmError::InvalidResponse {
                            provider: llm.provider_name().to_string(),
                            reason: "empty summary".into(),
                        });
                    }
                    Ok(content.to_string())
                }
            })
            .await
    }

    /// Send to the group, then to each community group. Returns (sent, failed).
    async fn deliver(&self, group: &Group, summary: &str) -> (usize, usize) {
        let mut destinations = vec![group.group_jid.clone()];
        match self.store.community_groups(group).await {
            Ok(linked) => destinations.extend(linked.into_iter().map(|g| g.group_jid)),
            Err(e) => {
                error!(error = %e, group = %group.group_jid, "Failed to load community groups");
            }
        }

        let (mut sent, mut failed) = (0, 0);
        for destination in &destinations {
            match self.outbox.send(destination, summary, None).await {
                Ok(_) => sent += 1,
                Err(e) => {
                    failed += 1;
                    error!(
                        error = %e,
                        group = %group.group_jid,
                        destination = %destination,
                        "Failed to send group summary"
                    );
                }
            }
        }
        (sent, failed)
    }
}
