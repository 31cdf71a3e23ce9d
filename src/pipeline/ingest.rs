//! Inbound ingestion: record senders, groups, messages, and reactions.

use chrono::Utc;
use tracing::debug;

use crate::error::DatabaseError;
use crate::pipeline::types::{Message, Reaction};
use crate::store::Database;

/// Store an inbound message. Returns `false` when it has no text and was skipped.
///
/// Sender and group rows are created on first sight; a new group starts
/// unmanaged with its watermark at the time it was first seen.
pub async fn store_message(
    store: &dyn Database,
    message: &Message,
    push_name: Option<&str>,
) -> Result<bool, DatabaseError> {
    if message.text().is_none() {
        debug!(id = %message.message_id, "Skipping message without text");
        return Ok(false);
    }

    store.upsert_sender(&message.sender_jid, push_name).await?;
    if let Some(group_jid) = &message.group_jid {
        store.ensure_group(group_jid, Utc::now()).await?;
    }
    store.insert_message(message).await?;
    Ok(true)
}

/// Apply an inbound reaction. An empty emoji withdraws the sender's reaction.
///
/// The reacted-to message need not be stored; reactions to messages sent
/// before the assistant joined are kept as well.
pub async fn store_reaction(
    store: &dyn Database,
    reaction: &Reaction,
    push_name: Option<&str>,
) -> Result<(), DatabaseError> {
    if reaction.is_removal() {
        let removed = store
            .remove_reaction(&reaction.message_id, &reaction.sender_jid)
            .await?;
        debug!(
            message = %reaction.message_id,
            sender = %reaction.sender_jid,
            removed,
            "Reaction withdrawn"
        );
        return Ok(());
    }

    store.upsert_sender(&reaction.sender_jid, push_name).await?;
    store.upsert_reaction(reaction).await?;
    debug!(message = %reaction.message_id, sender = %reaction.sender_jid, "Stored reaction");
    Ok(())
}
