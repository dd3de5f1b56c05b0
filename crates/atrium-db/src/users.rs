//! Users, the follow graph and projects. These belong to the profile side
//! of the platform; the messaging core only reads them, apart from the
//! follow/like writes that produce notifications.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::Database;
use crate::columns::{format_timestamp, uuid};
use crate::models::{NewUser, ProjectRow, UserRow};

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &NewUser<'_>, now: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, username, avatar, role, bio, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    user.id.to_string(),
                    user.name,
                    user.username,
                    user.avatar,
                    user.role,
                    user.bio,
                    format_timestamp(now),
                ],
            )?;
            Ok(())
        })
    }

    pub fn user_exists(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let exists = conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM users WHERE id = ?1)",
                [id.to_string()],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    /// Load a user together with the follower count and whether `viewer`
    /// follows them.
    pub fn get_user(&self, id: Uuid, viewer: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, id, viewer))
    }

    // -- Follow graph --

    /// Returns true if the edge did not exist before.
    pub fn follow(&self, follower: Uuid, followee: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO follows (follower_id, followee_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![follower.to_string(), followee.to_string(), format_timestamp(now)],
            )?;
            Ok(inserted == 1)
        })
    }

    /// Returns true if an edge was removed.
    pub fn unfollow(&self, follower: Uuid, followee: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
                params![follower.to_string(), followee.to_string()],
            )?;
            Ok(removed == 1)
        })
    }

    /// True if either user follows the other.
    pub fn connected_either_way(&self, a: Uuid, b: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let exists = conn.query_row(
                "SELECT EXISTS (
                    SELECT 1 FROM follows
                    WHERE (follower_id = ?1 AND followee_id = ?2)
                       OR (follower_id = ?2 AND followee_id = ?1)
                 )",
                params![a.to_string(), b.to_string()],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    // -- Projects --

    pub fn create_project(&self, id: Uuid, owner_id: Uuid, title: &str, now: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projects (id, owner_id, title, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), owner_id.to_string(), title, format_timestamp(now)],
            )?;
            Ok(())
        })
    }

    pub fn get_project(&self, id: Uuid) -> Result<Option<ProjectRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, owner_id, title FROM projects WHERE id = ?1",
                    [id.to_string()],
                    |row| {
                        Ok(ProjectRow {
                            id: uuid(row, 0)?,
                            owner_id: uuid(row, 1)?,
                            title: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Returns true if this is a new like.
    pub fn like_project(&self, project_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO project_likes (project_id, user_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![project_id.to_string(), user_id.to_string(), format_timestamp(now)],
            )?;
            Ok(inserted == 1)
        })
    }
}

fn query_user(conn: &Connection, id: Uuid, viewer: Uuid) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.name, u.username, u.avatar, u.role, u.bio,
                (SELECT COUNT(*) FROM follows f WHERE f.followee_id = u.id),
                EXISTS (SELECT 1 FROM follows f WHERE f.follower_id = ?2 AND f.followee_id = u.id)
         FROM users u
         WHERE u.id = ?1",
    )?;

    let row = stmt
        .query_row(params![id.to_string(), viewer.to_string()], |row| {
            Ok(UserRow {
                id: uuid(row, 0)?,
                name: row.get(1)?,
                username: row.get(2)?,
                avatar: row.get(3)?,
                role: row.get(4)?,
                bio: row.get(5)?,
                followers_count: row.get::<_, i64>(6)?.max(0) as u64,
                viewer_follows: row.get(7)?,
            })
        })
        .optional()?;

    Ok(row)
}
