//! Channel abstraction for message I/O.

pub mod outbox;
pub mod webhook;
pub mod whatsapp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

pub use outbox::Outbox;
pub use webhook::{AppState, webhook_routes};
pub use whatsapp::WhatsAppClient;

/// An outbound chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendRequest {
    /// Destination chat (group or direct).
    pub to: String,
    pub text: String,
    /// Message id to thread the reply under.
    pub in_reply_to: Option<String>,
}

/// Gateway acknowledgement for a sent message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SendResponse {
    pub message_id: Option<String>,
    #[serde(default)]
    pub status: String,
}

/// A chat transport: sends messages and knows who "we" are on it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    async fn send(&self, request: &SendRequest) -> Result<SendResponse, ChannelError>;

    /// The assistant's own identifier on this transport.
    async fn self_identity(&self) -> Result<String, ChannelError>;
}
