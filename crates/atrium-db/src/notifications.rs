use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use crate::Database;
use crate::columns::{format_timestamp, opt_timestamp, opt_uuid, parsed, timestamp, uuid};
use crate::models::{ActorRow, NewNotification, NotificationRow, ProjectRow};

// Actor and project are joined in so listing does not fan out into
// per-row lookups.
const NOTIFICATION_SELECT: &str = "
    SELECT n.id, n.recipient_id, n.notification_type, n.read, n.read_at, n.created_at,
           n.actor_id, u.name, u.username, u.avatar, u.role,
           n.project_id, p.owner_id, p.title
    FROM notifications n
    LEFT JOIN users u ON u.id = n.actor_id
    LEFT JOIN projects p ON p.id = n.project_id";

impl Database {
    pub fn insert_notification(&self, new: &NewNotification) -> Result<NotificationRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, recipient_id, actor_id, project_id, notification_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    new.id.to_string(),
                    new.recipient_id.to_string(),
                    new.actor_id.to_string(),
                    new.project_id.map(|p| p.to_string()),
                    new.notification_type.as_str(),
                    format_timestamp(new.created_at),
                ],
            )?;

            query_notification(conn, new.id)?
                .ok_or_else(|| anyhow!("notification {} missing after insert", new.id))
        })
    }

    /// Newest first, ignoring anything created before `not_before`.
    pub fn list_notifications(
        &self,
        recipient_id: Uuid,
        limit: u32,
        not_before: DateTime<Utc>,
    ) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{NOTIFICATION_SELECT}
                 WHERE n.recipient_id = ?1 AND n.created_at >= ?2
                 ORDER BY n.created_at DESC, n.rowid DESC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![recipient_id.to_string(), format_timestamp(not_before), limit],
                    map_notification,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Mark one of the recipient's notifications read. The first `read_at`
    /// is kept on repeated calls. `None` if the notification does not
    /// exist, belongs to someone else, or has expired.
    pub fn mark_notification_read(
        &self,
        recipient_id: Uuid,
        id: Uuid,
        now: DateTime<Utc>,
        not_before: DateTime<Utc>,
    ) -> Result<Option<NotificationRow>> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE notifications SET read = 1, read_at = COALESCE(read_at, ?1)
                 WHERE id = ?2 AND recipient_id = ?3 AND created_at >= ?4",
                params![
                    format_timestamp(now),
                    id.to_string(),
                    recipient_id.to_string(),
                    format_timestamp(not_before),
                ],
            )?;

            if updated == 0 {
                return Ok(None);
            }
            query_notification(conn, id)
        })
    }

    pub fn mark_all_notifications_read(&self, recipient_id: Uuid, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE notifications SET read = 1, read_at = ?1
                 WHERE recipient_id = ?2 AND read = 0",
                params![format_timestamp(now), recipient_id.to_string()],
            )?;
            Ok(updated)
        })
    }

    /// Returns true if a notification owned by `recipient_id` was removed.
    pub fn delete_notification(&self, recipient_id: Uuid, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM notifications WHERE id = ?1 AND recipient_id = ?2",
                params![id.to_string(), recipient_id.to_string()],
            )?;
            Ok(removed == 1)
        })
    }

    /// Delete notifications created before `cutoff`. Returns the count.
    pub fn purge_notifications_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM notifications WHERE created_at < ?1",
                [format_timestamp(cutoff)],
            )?;
            Ok(removed)
        })
    }
}

fn query_notification(conn: &Connection, id: Uuid) -> Result<Option<NotificationRow>> {
    let sql = format!("{NOTIFICATION_SELECT} WHERE n.id = ?1");
    let row = conn
        .query_row(&sql, [id.to_string()], map_notification)
        .optional()?;
    Ok(row)
}

fn map_notification(row: &Row) -> rusqlite::Result<NotificationRow> {
    let actor_id = uuid(row, 6)?;
    let actor_name: Option<String> = row.get(7)?;
    let actor = match actor_name {
        Some(name) => Some(ActorRow {
            id: actor_id,
            name,
            username: row.get(8)?,
            avatar: row.get(9)?,
            role: row.get(10)?,
        }),
        None => None,
    };

    let project = match (opt_uuid(row, 11)?, opt_uuid(row, 12)?) {
        (Some(id), Some(owner_id)) => Some(ProjectRow {
            id,
            owner_id,
            title: row.get(13)?,
        }),
        _ => None,
    };

    Ok(NotificationRow {
        id: uuid(row, 0)?,
        recipient_id: uuid(row, 1)?,
        notification_type: parsed(row, 2)?,
        read: row.get(3)?,
        read_at: opt_timestamp(row, 4)?,
        created_at: timestamp(row, 5)?,
        actor,
        project,
    })
}
