//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::pipeline::types::{Group, KnowledgeTopic, Message, Reaction};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    /// Owns the database the connection was opened from.
    _db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            _db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            _db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_groups(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        op: &str,
    ) -> Result<Vec<Group>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut groups = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            match row_to_group(&row) {
                Ok(group) => groups.push(group),
                Err(e) => tracing::warn!("Skipping group row: {e}"),
            }
        }
        Ok(groups)
    }

    async fn query_messages(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        op: &str,
    ) -> Result<Vec<Message>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut messages = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            match row_to_message(&row) {
                Ok(msg) => messages.push(msg),
                Err(e) => tracing::warn!("Skipping message row: {e}"),
            }
        }
        Ok(messages)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width UTC timestamps, so text comparison matches time order.
fn fmt_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

const GROUP_COLUMNS: &str =
    "group_jid, group_name, owner_jid, managed, last_summary_sync, last_ingest, community_keys";

const MESSAGE_COLUMNS: &str =
    "message_id, chat_jid, sender_jid, text, timestamp, group_jid, reply_to_id";

const REACTION_COLUMNS: &str = "message_id, sender_jid, emoji, timestamp";

const TOPIC_COLUMNS: &str = "id, group_jid, start_time, subject, summary, speakers, embedding";

/// Map a libsql Row to a Group. Column order matches GROUP_COLUMNS.
fn row_to_group(row: &libsql::Row) -> Result<Group, libsql::Error> {
    let managed: i64 = row.get(3)?;
    let sync_str: String = row.get(4)?;
    let ingest_str: String = row.get(5)?;
    let keys_str: String = row.get(6)?;

    Ok(Group {
        group_jid: row.get(0)?,
        group_name: row.get(1).ok(),
        owner_jid: row.get(2).ok(),
        managed: managed != 0,
        last_summary_sync: parse_datetime(&sync_str),
        last_ingest: parse_datetime(&ingest_str),
        community_keys: serde_json::from_str(&keys_str).unwrap_or_default(),
    })
}

/// Map a libsql Row to a Message. Column order matches MESSAGE_COLUMNS.
fn row_to_message(row: &libsql::Row) -> Result<Message, libsql::Error> {
    let ts_str: String = row.get(4)?;

    Ok(Message {
        message_id: row.get(0)?,
        chat_jid: row.get(1)?,
        sender_jid: row.get(2)?,
        text: row.get(3).ok(),
        timestamp: parse_datetime(&ts_str),
        group_jid: row.get(5).ok(),
        reply_to_id: row.get(6).ok(),
    })
}

/// Map a libsql Row to a Reaction. Column order matches REACTION_COLUMNS.
fn row_to_reaction(row: &libsql::Row) -> Result<Reaction, libsql::Error> {
    let ts_str: String = row.get(3)?;

    Ok(Reaction {
        message_id: row.get(0)?,
        sender_jid: row.get(1)?,
        emoji: row.get(2)?,
        timestamp: parse_datetime(&ts_str),
    })
}

/// Map a libsql Row to a KnowledgeTopic. Column order matches TOPIC_COLUMNS.
fn row_to_topic(row: &libsql::Row) -> Result<KnowledgeTopic, libsql::Error> {
    let start_str: String = row.get(2)?;
    let speakers_str: String = row.get(5)?;
    let embedding_str: String = row.get(6)?;

    Ok(KnowledgeTopic {
        id: row.get(0)?,
        group_jid: row.get(1)?,
        start_time: parse_datetime(&start_str),
        subject: row.get(3)?,
        summary: row.get(4)?,
        speakers: speakers_str
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        embedding: serde_json::from_str(&embedding_str).unwrap_or_default(),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Senders ─────────────────────────────────────────────────────

    async fn upsert_sender(
        &self,
        jid: &str,
        push_name: Option<&str>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO senders (jid, push_name) VALUES (?1, ?2)
                 ON CONFLICT(jid) DO UPDATE SET push_name = COALESCE(excluded.push_name, senders.push_name)",
                params![jid, opt_text(push_name)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_sender: {e}")))?;
        Ok(())
    }

    // ── Groups ──────────────────────────────────────────────────────

    async fn ensure_group(&self, group_jid: &str, now: DateTime<Utc>) -> Result<(), DatabaseError> {
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO chat_groups (group_jid, last_summary_sync, last_ingest) VALUES (?1, ?2, ?2)",
                params![group_jid, fmt_datetime(now)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("ensure_group: {e}")))?;
        if inserted > 0 {
            debug!(group = %group_jid, "Registered new group");
        }
        Ok(())
    }

    async fn upsert_group(&self, group: &Group) -> Result<(), DatabaseError> {
        let keys = serde_json::to_string(&group.community_keys)
            .map_err(|e| DatabaseError::Serialization(format!("community_keys: {e}")))?;

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO chat_groups ({GROUP_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(group_jid) DO UPDATE SET
                        group_name = excluded.group_name,
                        owner_jid = excluded.owner_jid,
                        managed = excluded.managed,
                        community_keys = excluded.community_keys,
                        last_summary_sync = MAX(chat_groups.last_summary_sync, excluded.last_summary_sync),
                        last_ingest = MAX(chat_groups.last_ingest, excluded.last_ingest)"
                ),
                params![
                    group.group_jid.as_str(),
                    opt_text(group.group_name.as_deref()),
                    opt_text(group.owner_jid.as_deref()),
                    i64::from(group.managed),
                    fmt_datetime(group.last_summary_sync),
                    fmt_datetime(group.last_ingest),
                    keys,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_group: {e}")))?;
        Ok(())
    }

    async fn get_group(&self, group_jid: &str) -> Result<Option<Group>, DatabaseError> {
        let mut groups = self
            .query_groups(
                &format!("SELECT {GROUP_COLUMNS} FROM chat_groups WHERE group_jid = ?1"),
                params![group_jid],
                "get_group",
            )
            .await?;
        Ok(groups.pop())
    }

    async fn list_managed_groups(&self) -> Result<Vec<Group>, DatabaseError> {
        self.query_groups(
            &format!("SELECT {GROUP_COLUMNS} FROM chat_groups WHERE managed = 1 ORDER BY group_jid"),
            (),
            "list_managed_groups",
        )
        .await
    }

    async fn community_groups(&self, group: &Group) -> Result<Vec<Group>, DatabaseError> {
        if group.community_keys.is_empty() {
            return Ok(Vec::new());
        }
        let keys = serde_json::to_string(&group.community_keys)
            .map_err(|e| DatabaseError::Serialization(format!("community_keys: {e}")))?;

        self.query_groups(
            "SELECT DISTINCT g.group_jid, g.group_name, g.owner_jid, g.managed, g.last_summary_sync, g.last_ingest, g.community_keys
             FROM chat_groups g, json_each(g.community_keys) k
             WHERE g.group_jid != ?1 AND k.value IN (SELECT value FROM json_each(?2))
             ORDER BY g.group_jid",
            params![group.group_jid.as_str(), keys],
            "community_groups",
        )
        .await
    }

    async fn advance_summary_sync(
        &self,
        group_jid: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE chat_groups SET last_summary_sync = MAX(last_summary_sync, ?2) WHERE group_jid = ?1",
                params![group_jid, fmt_datetime(at)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("advance_summary_sync: {e}")))?;

        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "group".into(),
                id: group_jid.to_string(),
            });
        }
        Ok(())
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn insert_message(&self, message: &Message) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ),
                params![
                    message.message_id.as_str(),
                    message.chat_jid.as_str(),
                    message.sender_jid.as_str(),
                    opt_text(message.text.as_deref()),
                    fmt_datetime(message.timestamp),
                    opt_text(message.group_jid.as_deref()),
                    opt_text(message.reply_to_id.as_deref()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_message: {e}")))?;
        Ok(())
    }

    async fn recent_chat_messages(
        &self,
        chat_jid: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Message>, DatabaseError> {
        self.query_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE chat_jid = ?1 AND timestamp >= ?2
                 ORDER BY timestamp DESC LIMIT ?3"
            ),
            params![chat_jid, fmt_datetime(since), limit as i64],
            "recent_chat_messages",
        )
        .await
    }

    async fn group_messages_since(
        &self,
        group_jid: &str,
        since: DateTime<Utc>,
        exclude_sender: &str,
    ) -> Result<Vec<Message>, DatabaseError> {
        self.query_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE group_jid = ?1 AND timestamp >= ?2 AND sender_jid != ?3
                 ORDER BY timestamp DESC"
            ),
            params![group_jid, fmt_datetime(since), exclude_sender],
            "group_messages_since",
        )
        .await
    }

    // ── Reactions ───────────────────────────────────────────────────

    async fn upsert_reaction(&self, reaction: &Reaction) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO reactions ({REACTION_COLUMNS}) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(message_id, sender_jid) DO UPDATE SET
                        emoji = excluded.emoji,
                        timestamp = excluded.timestamp"
                ),
                params![
                    reaction.message_id.as_str(),
                    reaction.sender_jid.as_str(),
                    reaction.emoji.as_str(),
                    fmt_datetime(reaction.timestamp),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_reaction: {e}")))?;
        Ok(())
    }

    async fn remove_reaction(
        &self,
        message_id: &str,
        sender_jid: &str,
    ) -> Result<bool, DatabaseError> {
        let deleted = self
            .conn()
            .execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND sender_jid = ?2",
                params![message_id, sender_jid],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("remove_reaction: {e}")))?;
        Ok(deleted > 0)
    }

    async fn message_reactions(&self, message_id: &str) -> Result<Vec<Reaction>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {REACTION_COLUMNS} FROM reactions WHERE message_id = ?1 ORDER BY timestamp, id"
                ),
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("message_reactions: {e}")))?;

        let mut reactions = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("message_reactions: {e}")))?
        {
            match row_to_reaction(&row) {
                Ok(reaction) => reactions.push(reaction),
                Err(e) => tracing::warn!("Skipping reaction row: {e}"),
            }
        }
        Ok(reactions)
    }

    // ── Knowledge topics ────────────────────────────────────────────

    async fn upsert_topics(&self, topics: &[KnowledgeTopic]) -> Result<(), DatabaseError> {
        for topic in topics {
            let embedding = serde_json::to_string(&topic.embedding)
                .map_err(|e| DatabaseError::Serialization(format!("embedding: {e}")))?;
            self.conn()
                .execute(
                    &format!(
                        "INSERT OR REPLACE INTO knowledge_topics ({TOPIC_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                    ),
                    params![
                        topic.id.as_str(),
                        topic.group_jid.as_str(),
                        fmt_datetime(topic.start_time),
                        topic.subject.as_str(),
                        topic.summary.as_str(),
                        topic.speakers.join(","),
                        embedding,
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("upsert_topics: {e}")))?;
        }
        debug!(count = topics.len(), "Stored knowledge topics");
        Ok(())
    }

    async fn group_topics(&self, group_jid: &str) -> Result<Vec<KnowledgeTopic>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TOPIC_COLUMNS} FROM knowledge_topics WHERE group_jid = ?1 ORDER BY start_time, id"
                ),
                params![group_jid],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("group_topics: {e}")))?;

        let mut topics = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("group_topics: {e}")))?
        {
            match row_to_topic(&row) {
                Ok(topic) => topics.push(topic),
                Err(e) => tracing::warn!("Skipping topic row: {e}"),
            }
        }
        Ok(topics)
    }

    async fn advance_last_ingest(
        &self,
        group_jid: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE chat_groups SET last_ingest = MAX(last_ingest, ?2) WHERE group_jid = ?1",
                params![group_jid, fmt_datetime(at)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("advance_last_ingest: {e}")))?;

        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "group".into(),
                id: group_jid.to_string(),
            });
        }
        Ok(())
    }
}
