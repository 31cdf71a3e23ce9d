//! HTTP entry points: gateway webhook, status, and manual job triggers.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::channels::Outbox;
use crate::digest::{SummaryFanout, TopicLoader};
use crate::error::ChannelError;
use crate::jid;
use crate::pipeline::MessageRouter;
use crate::pipeline::ingest;
use crate::pipeline::types::{Message, Reaction};
use crate::store::Database;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Database>,
    pub outbox: Arc<Outbox>,
    pub router: Arc<MessageRouter>,
    pub fanout: Arc<SummaryFanout>,
    pub topics: Arc<TopicLoader>,
}

/// Build the Axum router.
pub fn webhook_routes(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(receive_webhook))
        .route("/status", get(status))
        .route("/trigger/summaries", post(trigger_summaries))
        .route("/trigger/topics", post(trigger_topics))
        .with_state(state)
}

// ── Payload ─────────────────────────────────────────────────────────

/// Webhook body posted by the gateway for every chat event.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    /// `sender` for direct chats, `sender in group` for groups.
    pub from: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub pushname: Option<String>,
    pub message: Option<WebhookMessage>,
    pub reaction: Option<WebhookReaction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookMessage {
    pub id: Option<String>,
    pub text: Option<String>,
    pub replied_id: Option<String>,
}

/// `id` is the reacted-to message, `message` the emoji (empty on removal).
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookReaction {
    pub id: Option<String>,
    pub message: Option<String>,
}

impl WebhookPayload {
    /// Normalized sender and, for group events, the group.
    fn sender_and_group(&self) -> Result<(String, Option<String>), ChannelError> {
        let from = self
            .from
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| ChannelError::InvalidMessage("missing sender".into()))?;

        Ok(match from.split_once(" in ") {
            Some((sender, group)) => (jid::normalize(sender), Some(jid::normalize(group))),
            None => (jid::normalize(from), None),
        })
    }

    /// Convert to a [`Reaction`]. Events without a reaction yield `None`.
    pub fn to_reaction(&self) -> Result<Option<Reaction>, ChannelError> {
        let Some(body) = &self.reaction else {
            return Ok(None);
        };
        let id = body
            .id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ChannelError::InvalidMessage("missing reacted message id".into()))?;
        let (sender, _) = self.sender_and_group()?;

        Ok(Some(Reaction {
            message_id: id.to_string(),
            sender_jid: sender,
            emoji: body.message.clone().unwrap_or_default(),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        }))
    }

    /// Convert to a [`Message`]. Events without a message body yield `None`.
    pub fn to_message(&self) -> Result<Option<Message>, ChannelError> {
        let Some(body) = &self.message else {
            return Ok(None);
        };
        let id = body
            .id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ChannelError::InvalidMessage("missing message id".into()))?;
        let (sender, group) = self.sender_and_group()?;
        let chat = group.clone().unwrap_or_else(|| sender.clone());

        Ok(Some(Message {
            message_id: id.to_string(),
            chat_jid: chat,
            sender_jid: sender,
            text: body.text.clone().filter(|t| !t.is_empty()),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            group_jid: group,
            reply_to_id: body.replied_id.clone().filter(|r| !r.is_empty()),
        }))
    }
}

// ── Handlers ────────────────────────────────────────────────────────

async fn status() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn receive_webhook(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> Response {
    match payload.to_reaction() {
        Ok(Some(reaction)) => return receive_reaction(&state, &reaction, &payload).await,
        Ok(None) => {}
        Err(e) => {
            warn!(error = %e, "Rejected reaction payload");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    }

    let message = match payload.to_message() {
        Ok(Some(message)) => message,
        Ok(None) => {
            debug!("Ignoring webhook event without a message");
            return StatusCode::OK.into_response();
        }
        Err(e) => {
            warn!(error = %e, "Rejected webhook payload");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    match ingest::store_message(state.store.as_ref(), &message, payload.pushname.as_deref()).await
    {
        Ok(true) => {}
        Ok(false) => return StatusCode::OK.into_response(),
        Err(e) => {
            error!(error = %e, id = %message.message_id, "Failed to store inbound message");
            return (StatusCode::INTERNAL_SERVER_ERROR, "storage failure").into_response();
        }
    }

    let me = match state.outbox.self_identity().await {
        Ok(me) => me,
        Err(e) => {
            warn!(error = %e, "Own identity unknown, not responding");
            return StatusCode::OK.into_response();
        }
    };

    if should_respond(&message, &me) {
        info!(id = %message.message_id, chat = %message.chat_jid, "Dispatching message");
        let router = state.router.clone();
        tokio::spawn(async move {
            router.handle(&message).await;
        });
    }
    StatusCode::OK.into_response()
}

async fn receive_reaction(
    state: &AppState,
    reaction: &Reaction,
    payload: &WebhookPayload,
) -> Response {
    match ingest::store_reaction(state.store.as_ref(), reaction, payload.pushname.as_deref()).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            error!(error = %e, message = %reaction.message_id, "Failed to store reaction");
            (StatusCode::INTERNAL_SERVER_ERROR, "storage failure").into_response()
        }
    }
}

/// Direct chats always get an answer; groups only when the assistant is tagged.
fn should_respond(message: &Message, me: &str) -> bool {
    if message.sender_jid == me {
        return false;
    }
    match (&message.group_jid, message.text()) {
        (None, Some(_)) => true,
        (Some(_), Some(text)) => jid::mentions(text, me),
        (_, None) => false,
    }
}

async fn trigger_summaries(State(state): State<AppState>) -> Response {
    match state.fanout.run_once().await {
        Ok(Some(report)) => Json(report).into_response(),
        Ok(None) => (StatusCode::CONFLICT, "summary run already in progress").into_response(),
        Err(e) => {
            error!(error = %e, "On-demand summary run failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn trigger_topics(State(state): State<AppState>) -> Response {
    match state.topics.run_once().await {
        Ok(Some(report)) => Json(report).into_response(),
        Ok(None) => (StatusCode::CONFLICT, "topic ingestion already in progress").into_response(),
        Err(e) => {
            error!(error = %e, "On-demand topic ingestion failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
