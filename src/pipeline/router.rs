//! Message router: classifies an inbound message and answers it.
//!
//! Every branch ends in either a threaded reply or a logged no-op;
//! nothing escapes [`MessageRouter::handle`].

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::channels::Outbox;
use crate::error::{Error, LlmError};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::intent::IntentClassifier;
use crate::pipeline::types::{Intent, KnowledgeBase, Message, RoutingDecision};
use crate::prompts;
use crate::store::Database;

/// How far back an on-demand summary looks.
const ON_DEMAND_WINDOW_HOURS: i64 = 24;

/// Most messages fed into an on-demand summary.
const ON_DEMAND_MESSAGE_LIMIT: usize = 30;

pub const NOTHING_TO_SUMMARIZE_REPLY: &str = "No messages found from today to summarize.";

pub const CONTENT_POLICY_REPLY: &str = "I'm sorry, but I can't summarize today's messages due to content policy restrictions. Some messages may contain content that can't be processed.";

pub const SUMMARY_FAILED_REPLY: &str =
    "I encountered an error while trying to summarize today's messages. Please try again later.";

pub const ABOUT_REPLY: &str = "I'm an open-source bot - \nI can help you catch up on the chat messages and answer questions based on the group's knowledge.";

pub const DEFAULT_REPLY: &str = "I'm sorry, but I dont think this is something I can help with right now 😅.\n I can help catch up on the chat messages or answer questions based on the group's knowledge.";

pub struct MessageRouter {
    store: Arc<dyn Database>,
    outbox: Arc<Outbox>,
    classifier: IntentClassifier,
    llm: Arc<dyn LlmProvider>,
    knowledge: Arc<dyn KnowledgeBase>,
}

impl MessageRouter {
    pub fn new(
        store: Arc<dyn Database>,
        outbox: Arc<Outbox>,
        llm: Arc<dyn LlmProvider>,
        knowledge: Arc<dyn KnowledgeBase>,
    ) -> Self {
        Self {
            store,
            outbox,
            classifier: IntentClassifier::new(llm.clone()),
            llm,
            knowledge,
        }
    }

    /// Handle one inbound message. Failures are logged, never returned.
    pub async fn handle(&self, message: &Message) {
        let Some(text) = message.text() else {
            warn!(sender = %message.sender_jid, "Received message with no text");
            return;
        };

        let intent = self.classifier.classify(text).await;
        info!(
            id = %message.message_id,
            chat = %message.chat_jid,
            intent = %intent,
            "Routing message"
        );

        let decision = RoutingDecision { intent, message };
        if let Err(e) = self.dispatch(decision).await {
            error!(
                error = %e,
                id = %message.message_id,
                intent = %intent,
                "Failed to handle message"
            );
        }
    }

    async fn dispatch(&self, decision: RoutingDecision<'_>) -> Result<(), Error> {
        let message = decision.message;
        match decision.intent {
            Intent::Summarize => self.summarize(message).await,
            Intent::AskQuestion => self.knowledge.answer(message).await,
            Intent::About => self.reply(message, ABOUT_REPLY).await,
            Intent::Other => self.reply(message, DEFAULT_REPLY).await,
        }
    }

    async fn reply(&self, message: &Message, text: &str) -> Result<(), Error> {
        self.outbox
            .send(&message.chat_jid, text, Some(&message.message_id))
            .await?;
        Ok(())
    }

    /// On-demand summary of the last day in this chat.
    async fn summarize(&self, message: &Message) -> Result<(), Error> {
        let since = Utc::now() - Duration::hours(ON_DEMAND_WINDOW_HOURS);
        let history = self
            .store
            .recent_chat_messages(&message.chat_jid, since, ON_DEMAND_MESSAGE_LIMIT)
            .await?;

        if history.is_empty() {
            return self.reply(message, NOTHING_TO_SUMMARIZE_REPLY).await;
        }

        let request = CompletionRequest::new(vec![
            ChatMessage::system(prompts::on_demand_summary_system_prompt()),
            ChatMessage::user(prompts::on_demand_summary_user_prompt(message, &history)),
        ]);

        let summary = self.llm.complete(request).await.and_then(|r| {
            let content = r.content.trim().to_string();
            if content.is_empty() {
                Err(LlmError::InvalidResponse {
                    provider: self.llm.provider_name().to_string(),
                    reason: "empty summary".into(),
                })
            } else {
                Ok(content)
            }
        });

        match summary {
            Ok(summary) => {
                debug!(chat = %message.chat_jid, messages = history.len(), "Sending on-demand summary");
                self.reply(message, &summary).await
            }
            Err(e) if e.is_content_filtered() => {
                warn!(chat = %message.chat_jid, "Summary blocked by content filter");
                debug!(error = %e, "Content filter details");
                self.reply(message, CONTENT_POLICY_REPLY).await
            }
            Err(e) => {
                error!(error = %e, chat = %message.chat_jid, "Summary generation failed");
                self.reply(message, SUMMARY_FAILED_REPLY).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::llm::Role;
    use crate::store::LibSqlBackend;
    use crate::testing::{MockLlm, RecordingTransport, group_message, request_failed};

    const BOT: &str = "972500000001@s.whatsapp.net";
    const GROUP: &str = "120363000000000001@g.us";

    #[derive(Default)]
    struct CountingKnowledgeBase {
        asked: AtomicUsize,
    }

    #[async_trait]
    impl KnowledgeBase for CountingKnowledgeBase {
        async fn answer(&self, _message: &Message) -> Result<(), Error> {
            self.asked.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        router: MessageRouter,
        store: Arc<dyn Database>,
        transport: Arc<RecordingTransport>,
        knowledge: Arc<CountingKnowledgeBase>,
    }

    async fn harness(llm: MockLlm) -> (Harness, Arc<MockLlm>) {
        let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let transport = Arc::new(RecordingTransport::new(BOT));
        let outbox = Arc::new(Outbox::new(transport.clone(), store.clone()));
        let knowledge = Arc::new(CountingKnowledgeBase::default());
        let llm = Arc::new(llm);
        let router = MessageRouter::new(store.clone(), outbox, llm.clone(), knowledge.clone());
        (
            Harness {
                router,
                store,
                transport,
                knowledge,
            },
            llm,
        )
    }

    fn request(text: &str) -> Message {
        group_message("req-1", GROUP, "972511111111@s.whatsapp.net", text, Utc::now())
    }

    /// Classifier calls carry a constrained output shape; summary calls do not.
    fn is_classification(req: &CompletionRequest) -> bool {
        req.output != crate::llm::OutputShape::Text
    }

    #[tokio::test]
    async fn summarize_with_no_history_replies_nothing_found() {
        let (h, llm) = harness(MockLlm::replying("summarize")).await;

        h.router.handle(&request("What happened today?")).await;

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, NOTHING_TO_SUMMARIZE_REPLY);
        assert_eq!(sent[0].in_reply_to.as_deref(), Some("req-1"));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn summarize_sends_model_output_threaded() {
        let llm = MockLlm::new(|req, _| {
            if is_classification(req) {
                Ok("summarize".into())
            } else {
                Ok("Today: lunch plans.".into())
            }
        });
        let (h, llm) = harness(llm).await;
        let now = Utc::now();
        for i in 0..3 {
            h.store
                .insert_message(&group_message(
                    &format!("m{i}"),
                    GROUP,
                    "972522222222@s.whatsapp.net",
                    "lunch at noon?",
                    now - Duration::minutes(10 + i),
                ))
                .await
                .unwrap();
        }

        h.router.handle(&request("catch me up")).await;

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "Today: lunch plans.");
        assert_eq!(sent[0].in_reply_to.as_deref(), Some("req-1"));

        let summary_req = &llm.requests()[1];
        let user = summary_req
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .unwrap();
        assert!(user.content.starts_with("@972511111111: catch me up"));
        assert!(user.content.contains("@972522222222: lunch at noon?"));
    }

    #[tokio::test]
    async fn summarize_caps_history_at_thirty_recent_messages() {
        let llm = MockLlm::new(|req, _| {
            if is_classification(req) {
                Ok("summarize".into())
            } else {
                Ok("ok".into())
            }
        });
        let (h, llm) = harness(llm).await;
        let now = Utc::now();
        for i in 0..40 {
            h.store
                .insert_message(&group_message(
                    &format!("m{i}"),
                    GROUP,
                    "972522222222@s.whatsapp.net",
                    &format!("msg {i}"),
                    now - Duration::minutes(i),
                ))
                .await
                .unwrap();
        }
        h.store
            .insert_message(&group_message(
                "stale",
                GROUP,
                "972522222222@s.whatsapp.net",
                "yesterday's news",
                now - Duration::hours(25),
            ))
            .await
            .unwrap();

        h.router.handle(&request("summary please")).await;

        let summary_req = &llm.requests()[1];
        let history = summary_req.messages.last().unwrap().content.clone();
        assert_eq!(history.matches("@972522222222:").count(), 30);
        assert!(history.contains("msg 0\n"));
        assert!(!history.contains("msg 30\n"));
        assert!(!history.contains("yesterday's news"));
    }

    #[tokio::test]
    async fn summary_content_filter_sends_policy_apology() {
        let llm = MockLlm::new(|req, _| {
            if is_classification(req) {
                Ok("summarize".into())
            } else {
                Err(request_failed("400: content_filter triggered"))
            }
        });
        let (h, _llm) = harness(llm).await;
        h.store
            .insert_message(&group_message(
                "m1",
                GROUP,
                "972522222222@s.whatsapp.net",
                "hi",
                Utc::now() - Duration::minutes(1),
            ))
            .await
            .unwrap();

        h.router.handle(&request("summarize")).await;

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, CONTENT_POLICY_REPLY);
    }

    #[tokio::test]
    async fn summary_other_failure_sends_generic_apology() {
        let llm = MockLlm::new(|req, _| {
            if is_classification(req) {
                Ok("summarize".into())
            } else {
                Err(request_failed("503 service unavailable"))
            }
        });
        let (h, _llm) = harness(llm).await;
        h.store
            .insert_message(&group_message(
                "m1",
                GROUP,
                "972522222222@s.whatsapp.net",
                "hi",
                Utc::now() - Duration::minutes(1),
            ))
            .await
            .unwrap();

        h.router.handle(&request("summarize")).await;

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, SUMMARY_FAILED_REPLY);
        assert_eq!(sent[0].in_reply_to.as_deref(), Some("req-1"));
    }

    #[tokio::test]
    async fn policy_violation_in_classifier_gets_default_reply() {
        let (h, _llm) = harness(MockLlm::failing(
            "Error code: 400 - {'error': {'code': 'ResponsibleAIPolicyViolation'}}",
        ))
        .await;

        h.router.handle(&request("something")).await;

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, DEFAULT_REPLY);
        assert_eq!(sent[0].in_reply_to.as_deref(), Some("req-1"));
    }

    #[tokio::test]
    async fn about_sends_capabilities() {
        let (h, _llm) = harness(MockLlm::replying("about")).await;
        h.router.handle(&request("who are you?")).await;

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, ABOUT_REPLY);
        assert_eq!(sent[0].to, GROUP);
    }

    #[tokio::test]
    async fn questions_go_to_knowledge_base() {
        let (h, _llm) = harness(MockLlm::replying("ask_question")).await;
        h.router.handle(&request("when is the next meetup?")).await;

        assert_eq!(h.knowledge.asked.load(Ordering::SeqCst), 1);
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn message_without_text_is_ignored() {
        let (h, llm) = harness(MockLlm::replying("about")).await;
        let mut msg = request("");
        msg.text = None;

        h.router.handle(&msg).await;

        assert_eq!(llm.calls(), 0);
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn replies_are_stored_as_own_messages() {
        let (h, _llm) = harness(MockLlm::replying("about")).await;
        h.router.handle(&request("who are you?")).await;

        let stored = h
            .store
            .group_messages_since(GROUP, Utc::now() - Duration::minutes(1), "nobody")
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sender_jid, BOT);
    }
}
