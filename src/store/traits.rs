//! `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::pipeline::types::{Group, KnowledgeTopic, Message, Reaction};

/// Backend-agnostic database trait covering senders, groups, messages,
/// reactions, and knowledge topics.
///
/// Every method is one self-contained statement, a read, or a run of
/// idempotent upserts, so a single
/// handle can be shared by concurrent per-group workflows without any
/// transaction spanning an await point.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Senders ─────────────────────────────────────────────────────

    /// Insert a sender, or refresh its push name when one is given.
    async fn upsert_sender(&self, jid: &str, push_name: Option<&str>)
    -> Result<(), DatabaseError>;

    // ── Groups ──────────────────────────────────────────────────────

    /// Create the group row if it does not exist yet, with both watermarks at
    /// `now`. Existing rows are untouched.
    async fn ensure_group(&self, group_jid: &str, now: DateTime<Utc>) -> Result<(), DatabaseError>;

    /// Insert or fully replace a group's descriptive fields.
    ///
    /// `last_summary_sync` and `last_ingest` are only ever moved forward.
    async fn upsert_group(&self, group: &Group) -> Result<(), DatabaseError>;

    async fn get_group(&self, group_jid: &str) -> Result<Option<Group>, DatabaseError>;

    /// All groups flagged `managed`.
    async fn list_managed_groups(&self) -> Result<Vec<Group>, DatabaseError>;

    /// Groups sharing a community key with `group`, excluding `group` itself.
    async fn community_groups(&self, group: &Group) -> Result<Vec<Group>, DatabaseError>;

    /// Move the group's watermark to `at` unless it is already later.
    async fn advance_summary_sync(
        &self,
        group_jid: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Insert a message, replacing any previous row with the same id.
    async fn insert_message(&self, message: &Message) -> Result<(), DatabaseError>;

    /// Messages in a chat at or after `since`, newest first, at most `limit`.
    async fn recent_chat_messages(
        &self,
        chat_jid: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Message>, DatabaseError>;

    /// Messages in a group at or after `since` not sent by `exclude_sender`,
    /// newest first.
    async fn group_messages_since(
        &self,
        group_jid: &str,
        since: DateTime<Utc>,
        exclude_sender: &str,
    ) -> Result<Vec<Message>, DatabaseError>;

    // ── Reactions ───────────────────────────────────────────────────

    /// Store `reaction`, replacing the sender's earlier reaction to the same message.
    async fn upsert_reaction(&self, reaction: &Reaction) -> Result<(), DatabaseError>;

    /// Delete the sender's reaction to a message. Returns whether one existed.
    async fn remove_reaction(&self, message_id: &str, sender_jid: &str)
    -> Result<bool, DatabaseError>;

    /// Reactions to a message, oldest first.
    async fn message_reactions(&self, message_id: &str) -> Result<Vec<Reaction>, DatabaseError>;

    // ── Knowledge topics ────────────────────────────────────────────

    /// Insert topics, replacing rows with the same id.
    async fn upsert_topics(&self, topics: &[KnowledgeTopic]) -> Result<(), DatabaseError>;

    /// Topics extracted from a group, oldest first.
    async fn group_topics(&self, group_jid: &str) -> Result<Vec<KnowledgeTopic>, DatabaseError>;

    /// Move the group's ingestion watermark to `at` unless it is already later.
    async fn advance_last_ingest(
        &self,
        group_jid: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;
}
