//! Knowledge-base stand-in used when no retrieval backend is wired.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::channels::Outbox;
use crate::error::Error;
use crate::pipeline::types::{KnowledgeBase, Message};

pub const KNOWLEDGE_UNAVAILABLE_REPLY: &str =
    "I can't answer questions from the group's history yet. Try asking me for a summary of today's messages instead.";

/// Replies with a fixed notice to every question.
pub struct UnavailableKnowledgeBase {
    outbox: Arc<Outbox>,
}

impl UnavailableKnowledgeBase {
    pub fn new(outbox: Arc<Outbox>) -> Self {
        Self { outbox }
    }
}

#[async_trait]
impl KnowledgeBase for UnavailableKnowledgeBase {
    async fn answer(&self, message: &Message) -> Result<(), Error> {
        info!(id = %message.message_id, "No knowledge base configured");
        self.outbox
            .send(
                &message.chat_jid,
                KNOWLEDGE_UNAVAILABLE_REPLY,
                Some(&message.message_id),
            )
            .await?;
        Ok(())
    }
}
