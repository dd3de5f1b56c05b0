use std::collections::HashMap;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use atrium_types::models::{Attachment, ReactionType};

use crate::Database;
use crate::columns::{format_timestamp, opt_timestamp, parsed, timestamp, uuid};
use crate::models::{MessageRow, NewMessage, ReactionRow};

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, recipient_id, body, read_at, created_at";

impl Database {
    /// Persist a message and move the conversation's last-message pointer
    /// to it, in one transaction.
    pub fn insert_message(&self, msg: &NewMessage<'_>) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let created_at = format_timestamp(msg.created_at);

            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, recipient_id, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    msg.id.to_string(),
                    msg.conversation_id.to_string(),
                    msg.sender_id.to_string(),
                    msg.recipient_id.to_string(),
                    msg.body,
                    created_at,
                ],
            )?;

            for (position, file) in msg.attachments.iter().enumerate() {
                let size = file
                    .size
                    .map(i64::try_from)
                    .transpose()
                    .map_err(|_| anyhow!("attachment size {:?} does not fit an INTEGER column", file.size))?;
                tx.execute(
                    "INSERT INTO message_attachments (message_id, position, url, name, mime, size)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        msg.id.to_string(),
                        position as i64,
                        file.url,
                        file.name,
                        file.mime,
                        size,
                    ],
                )?;
            }

            tx.execute(
                "UPDATE conversations SET last_message_id = ?1, last_message_at = ?2 WHERE id = ?3",
                params![msg.id.to_string(), created_at, msg.conversation_id.to_string()],
            )?;

            let row = query_message(&tx, msg.id)?
                .ok_or_else(|| anyhow!("message {} missing after insert", msg.id))?;
            tx.commit()?;
            Ok(row)
        })
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// The newest `limit` messages of a conversation older than `before`,
    /// returned oldest first.
    pub fn list_messages(
        &self,
        conversation_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1 AND (?2 IS NULL OR created_at < ?2)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(
                    params![conversation_id.to_string(), before.map(format_timestamp), limit],
                    map_message,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.reverse();
            attach_children(conn, &mut rows)?;
            Ok(rows)
        })
    }

    /// Mark every unread message addressed to `recipient_id` in the
    /// conversation as read. Returns how many rows changed.
    pub fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        recipient_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET read_at = ?1
                 WHERE conversation_id = ?2 AND recipient_id = ?3 AND read_at IS NULL",
                params![
                    format_timestamp(now),
                    conversation_id.to_string(),
                    recipient_id.to_string(),
                ],
            )?;
            Ok(updated)
        })
    }

    /// Replace the user's reaction on a message: the old one (if any) is
    /// removed and the new one appended after everyone else's.
    pub fn upsert_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        reaction_type: ReactionType,
        emoji: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "DELETE FROM message_reactions WHERE message_id = ?1 AND user_id = ?2",
                params![message_id.to_string(), user_id.to_string()],
            )?;
            tx.execute(
                "INSERT INTO message_reactions (message_id, user_id, reaction_type, emoji, seq, created_at)
                 VALUES (?1, ?2, ?3, ?4,
                         (SELECT COALESCE(MAX(seq), 0) + 1 FROM message_reactions WHERE message_id = ?1),
                         ?5)",
                params![
                    message_id.to_string(),
                    user_id.to_string(),
                    reaction_type.as_str(),
                    emoji,
                    format_timestamp(now),
                ],
            )?;

            let row = query_message(&tx, message_id)?
                .ok_or_else(|| anyhow!("message {} missing while reacting", message_id))?;
            tx.commit()?;
            Ok(row)
        })
    }
}

fn query_message(conn: &Connection, id: Uuid) -> Result<Option<MessageRow>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
    let row = conn.query_row(&sql, [id.to_string()], map_message).optional()?;

    match row {
        Some(row) => {
            let mut rows = vec![row];
            attach_children(conn, &mut rows)?;
            Ok(rows.pop())
        }
        None => Ok(None),
    }
}

fn map_message(row: &Row) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: uuid(row, 0)?,
        conversation_id: uuid(row, 1)?,
        sender_id: uuid(row, 2)?,
        recipient_id: uuid(row, 3)?,
        body: row.get(4)?,
        attachments: Vec::new(),
        reactions: Vec::new(),
        read_at: opt_timestamp(row, 5)?,
        created_at: timestamp(row, 6)?,
    })
}

/// Batch-load attachments and reactions for a page of messages.
fn attach_children(conn: &Connection, rows: &mut [MessageRow]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }

    let ids: Vec<String> = rows.iter().map(|r| r.id.to_string()).collect();
    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
    let params: Vec<&dyn rusqlite::types::ToSql> =
        ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

    let mut attachments: HashMap<Uuid, Vec<Attachment>> = HashMap::new();
    {
        let sql = format!(
            "SELECT message_id, url, name, mime, size FROM message_attachments
             WHERE message_id IN ({})
             ORDER BY message_id, position",
            placeholders.join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let found = stmt.query_map(params.as_slice(), |row| {
            Ok((
                uuid(row, 0)?,
                Attachment {
                    url: row.get(1)?,
                    name: row.get(2)?,
                    mime: row.get(3)?,
                    size: row.get::<_, Option<i64>>(4)?.map(|s| s.max(0) as u64),
                },
            ))
        })?;
        for entry in found {
            let (message_id, file) = entry?;
            attachments.entry(message_id).or_default().push(file);
        }
    }

    let mut reactions: HashMap<Uuid, Vec<ReactionRow>> = HashMap::new();
    {
        let sql = format!(
            "SELECT message_id, user_id, reaction_type, emoji, created_at FROM message_reactions
             WHERE message_id IN ({})
             ORDER BY message_id, seq",
            placeholders.join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let found = stmt.query_map(params.as_slice(), |row| {
            Ok((
                uuid(row, 0)?,
                ReactionRow {
                    user_id: uuid(row, 1)?,
                    reaction_type: parsed(row, 2)?,
                    emoji: row.get(3)?,
                    created_at: timestamp(row, 4)?,
                },
            ))
        })?;
        for entry in found {
            let (message_id, reaction) = entry?;
            reactions.entry(message_id).or_default().push(reaction);
        }
    }

    for row in rows.iter_mut() {
        row.attachments = attachments.remove(&row.id).unwrap_or_default();
        row.reactions = reactions.remove(&row.id).unwrap_or_default();
    }

    Ok(())
}
