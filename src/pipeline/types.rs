//! Shared types for message routing and summarization.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

// ── Message ─────────────────────────────────────────────────────────

/// A stored chat message. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    /// Chat the message was posted in (a group or a direct chat).
    pub chat_jid: String,
    pub sender_jid: String,
    pub text: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Set when the chat is a group.
    pub group_jid: Option<String>,
    pub reply_to_id: Option<String>,
}

impl Message {
    /// Text with surrounding whitespace removed, if any remains.
    pub fn text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

// ── Group ───────────────────────────────────────────────────────────

/// A chat group known to the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub group_jid: String,
    pub group_name: Option<String>,
    pub owner_jid: Option<String>,
    /// Only managed groups receive scheduled summaries.
    pub managed: bool,
    /// Boundary of already-summarized activity. Never moves backwards.
    pub last_summary_sync: DateTime<Utc>,
    /// Boundary of activity already turned into knowledge topics.
    pub last_ingest: DateTime<Utc>,
    /// Groups sharing any key are each other's community groups.
    pub community_keys: Vec<String>,
}

impl Group {
    /// Name used in summaries.
    pub fn display_name(&self) -> &str {
        self.group_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or("group")
    }
}

// ── Reaction ────────────────────────────────────────────────────────

/// An emoji reaction. A sender holds at most one reaction per message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub message_id: String,
    pub sender_jid: String,
    /// Empty when the sender withdrew their reaction.
    pub emoji: String,
    pub timestamp: DateTime<Utc>,
}

impl Reaction {
    pub fn is_removal(&self) -> bool {
        self.emoji.trim().is_empty()
    }
}

// ── Knowledge topic ─────────────────────────────────────────────────

/// One discussion thread extracted from a group's history, with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeTopic {
    /// Stable for the same group, start time, and subject.
    pub id: String,
    pub group_jid: String,
    /// Timestamp of the oldest message in the ingested batch.
    pub start_time: DateTime<Utc>,
    pub subject: String,
    pub summary: String,
    /// Participants, as normalized JIDs.
    pub speakers: Vec<String>,
    pub embedding: Vec<f64>,
}

// ── Intent ──────────────────────────────────────────────────────────

/// What an inbound message asks the assistant to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Summarize today's activity in this chat.
    Summarize,
    /// Answer from the group's accumulated knowledge.
    AskQuestion,
    /// Describe the assistant.
    About,
    /// Anything else.
    Other,
}

impl Intent {
    pub const ALL: [Intent; 4] = [
        Intent::Summarize,
        Intent::AskQuestion,
        Intent::About,
        Intent::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summarize => "summarize",
            Self::AskQuestion => "ask_question",
            Self::About => "about",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|i| i.as_str() == wanted)
            .ok_or_else(|| format!("unknown intent: '{s}'"))
    }
}

// ── Routing decision ────────────────────────────────────────────────

/// The intent chosen for one inbound message. Lives for one dispatch.
#[derive(Debug, Clone, Copy)]
pub struct RoutingDecision<'a> {
    pub intent: Intent,
    pub message: &'a Message,
}

// ── Knowledge base ──────────────────────────────────────────────────

/// Question answering over the group's history.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Answer `message`, replying through the transport as needed.
    async fn answer(&self, message: &Message) -> Result<(), Error>;
}
