//! Outbox: sends through the transport and records what was sent.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::channels::{SendRequest, Transport};
use crate::error::{ChannelError, Error};
use crate::jid;
use crate::pipeline::types::Message;
use crate::store::Database;

/// Every reply the assistant makes goes through here, so the stored history
/// includes the assistant's own messages under its own identity.
pub struct Outbox {
    transport: Arc<dyn Transport>,
    store: Arc<dyn Database>,
}

impl Outbox {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn Database>) -> Self {
        Self { transport, store }
    }

    /// The assistant's normalized identity.
    pub async fn self_identity(&self) -> Result<String, ChannelError> {
        let raw = self.transport.self_identity().await?;
        Ok(jid::normalize(&raw))
    }

    /// Send `text` to `to`, optionally threaded under `in_reply_to`, and store it.
    pub async fn send(
        &self,
        to: &str,
        text: &str,
        in_reply_to: Option<&str>,
    ) -> Result<Message, Error> {
        let to = jid::normalize(to);
        if to.is_empty() {
            return Err(ChannelError::InvalidMessage("destination is empty".into()).into());
        }
        if text.trim().is_empty() {
            return Err(ChannelError::InvalidMessage("message text is empty".into()).into());
        }

        let request = SendRequest {
            to: to.clone(),
            text: text.to_string(),
            in_reply_to: in_reply_to.map(str::to_string),
        };
        let response = self.transport.send(&request).await?;
        let me = self.self_identity().await?;

        let message = Message {
            message_id: response
                .message_id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            group_jid: jid::is_group(&to).then(|| to.clone()),
            chat_jid: to,
            sender_jid: me,
            text: Some(request.text),
            timestamp: Utc::now(),
            reply_to_id: request.in_reply_to,
        };
        self.store.insert_message(&message).await?;

        debug!(
            transport = self.transport.name(),
            chat = %message.chat_jid,
            message_id = %message.message_id,
            "Message sent"
        );
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::store::LibSqlBackend;
    use crate::testing::RecordingTransport;

    #[tokio::test]
    async fn sent_message_is_stored_as_own() {
        let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let transport = Arc::new(RecordingTransport::new("bot:7@s.whatsapp.net"));
        let outbox = Outbox::new(transport.clone(), store.clone());

        let sent = outbox
            .send("123:4@g.us", "hello", Some("orig-1"))
            .await
            .unwrap();

        assert_eq!(sent.chat_jid, "123@g.us");
        assert_eq!(sent.group_jid.as_deref(), Some("123@g.us"));
        assert_eq!(sent.sender_jid, "bot@s.whatsapp.net");
        assert_eq!(sent.reply_to_id.as_deref(), Some("orig-1"));

        let requests = transport.sent();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].to, "123@g.us");

        let stored = store
            .recent_chat_messages("123@g.us", Utc::now() - Duration::minutes(1), 10)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].message_id, sent.message_id);
    }

    #[tokio::test]
    async fn empty_text_is_rejected_without_sending() {
        let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let transport = Arc::new(RecordingTransport::new("bot@s.whatsapp.net"));
        let outbox = Outbox::new(transport.clone(), store);

        let err = outbox.send("1@g.us", "  ", None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Channel(ChannelError::InvalidMessage(_))
        ));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_is_not_stored() {
        let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let transport = Arc::new(RecordingTransport::new("bot@s.whatsapp.net").failing_for("1@g.us"));
        let outbox = Outbox::new(transport, store.clone());

        assert!(outbox.send("1@g.us", "hi", None).await.is_err());
        let stored = store
            .recent_chat_messages("1@g.us", Utc::now() - Duration::minutes(1), 10)
            .await
            .unwrap();
        assert!(stored.is_empty());
    }
}
