use std::collections::HashMap;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use crate::Database;
use crate::columns::{format_timestamp, opt_uuid, timestamp, uuid};
use crate::models::ConversationRow;

const CONVERSATION_COLUMNS: &str =
    "id, participant_a, participant_b, last_message_id, last_message_at, created_at";

impl Database {
    /// Find the conversation between two users, creating it if missing.
    /// Returns the row and whether this call created it. The unique pair
    /// constraint makes concurrent callers converge on one row.
    pub fn find_or_create_conversation(
        &self,
        a: Uuid,
        b: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(ConversationRow, bool)> {
        let (first, second) = canonical_pair(a, b);

        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO conversations (id, participant_a, participant_b, last_message_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT (participant_a, participant_b) DO NOTHING",
                params![
                    Uuid::new_v4().to_string(),
                    first.to_string(),
                    second.to_string(),
                    format_timestamp(now),
                ],
            )?;

            let row = query_conversation_by_pair(conn, first, second)?
                .ok_or_else(|| anyhow!("conversation between {} and {} missing after insert", a, b))?;

            Ok((row, inserted == 1))
        })
    }

    #[cfg(test)]
    pub fn find_conversation_between(&self, a: Uuid, b: Uuid) -> Result<Option<ConversationRow>> {
        let (first, second) = canonical_pair(a, b);
        self.with_conn(|conn| query_conversation_by_pair(conn, first, second))
    }

    pub fn get_conversation(&self, id: Uuid) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1");
            let row = conn
                .query_row(&sql, [id.to_string()], map_conversation)
                .optional()?;
            Ok(row)
        })
    }

    /// All conversations the user takes part in, most recent activity first.
    pub fn list_conversations_for(&self, user_id: Uuid) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 WHERE participant_a = ?1 OR participant_b = ?1
                 ORDER BY last_message_at DESC, created_at DESC, rowid DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], map_conversation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Unread messages addressed to `user_id`, grouped by conversation.
    /// Conversations with nothing unread are absent from the map.
    pub fn unread_counts(&self, user_id: Uuid) -> Result<HashMap<Uuid, u64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT conversation_id, COUNT(*) FROM messages
                 WHERE recipient_id = ?1 AND read_at IS NULL
                 GROUP BY conversation_id",
            )?;
            let counts = stmt
                .query_map([user_id.to_string()], |row| {
                    Ok((uuid(row, 0)?, row.get::<_, i64>(1)?.max(0) as u64))
                })?
                .collect::<std::result::Result<HashMap<_, _>, _>>()?;
            Ok(counts)
        })
    }
}

/// Participants are stored in a fixed order so the pair is unordered.
fn canonical_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b { (a, b) } else { (b, a) }
}

fn query_conversation_by_pair(conn: &Connection, first: Uuid, second: Uuid) -> Result<Option<ConversationRow>> {
    let sql = format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations
         WHERE participant_a = ?1 AND participant_b = ?2"
    );
    let row = conn
        .query_row(&sql, params![first.to_string(), second.to_string()], map_conversation)
        .optional()?;
    Ok(row)
}

fn map_conversation(row: &Row) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: uuid(row, 0)?,
        participant_a: uuid(row, 1)?,
        participant_b: uuid(row, 2)?,
        last_message_id: opt_uuid(row, 3)?,
        last_message_at: timestamp(row, 4)?,
        created_at: timestamp(row, 5)?,
    })
}
