//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS senders (
                jid TEXT PRIMARY KEY,
                push_name TEXT
            );

            CREATE TABLE IF NOT EXISTS chat_groups (
                group_jid TEXT PRIMARY KEY,
                group_name TEXT,
                owner_jid TEXT,
                managed INTEGER NOT NULL DEFAULT 0,
                last_summary_sync TEXT NOT NULL,
                last_ingest TEXT NOT NULL,
                community_keys TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_groups_managed ON chat_groups(managed);

            CREATE TABLE IF NOT EXISTS messages (
                message_id TEXT PRIMARY KEY,
                chat_jid TEXT NOT NULL,
                sender_jid TEXT NOT NULL,
                text TEXT,
                timestamp TEXT NOT NULL,
                group_jid TEXT,
                reply_to_id TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_messages_chat_ts ON messages(chat_jid, timestamp);
            CREATE INDEX IF NOT EXISTS idx_messages_group_ts ON messages(group_jid, timestamp);
            CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_jid);
        "#,
    },
    Migration {
        version: 2,
        name: "reactions",
        sql: r#"
            CREATE TABLE IF NOT EXISTS reactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL,
                sender_jid TEXT NOT NULL,
                emoji TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_reactions_message_sender
                ON reactions(message_id, sender_jid);
            CREATE INDEX IF NOT EXISTS idx_reactions_sender ON reactions(sender_jid);
        "#,
    },
    Migration {
        version: 3,
        name: "knowledge_topics",
        sql: r#"
            CREATE TABLE IF NOT EXISTS knowledge_topics (
                id TEXT PRIMARY KEY,
                group_jid TEXT NOT NULL,
                start_time TEXT NOT NULL,
                subject TEXT NOT NULL,
                summary TEXT NOT NULL,
                speakers TEXT NOT NULL DEFAULT '',
                embedding TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_topics_group ON knowledge_topics(group_jid, start_time);
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    tracing::info!(
        "Database migrations complete (at V{})",
        get_current_version(conn).await?
    );

    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
