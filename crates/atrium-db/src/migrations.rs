use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (social graph, conversations, messages)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                username    TEXT NOT NULL UNIQUE,
                avatar      TEXT,
                role        TEXT NOT NULL DEFAULT 'user',
                bio         TEXT,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE follows (
                follower_id TEXT NOT NULL REFERENCES users(id),
                followee_id TEXT NOT NULL REFERENCES users(id),
                created_at  TEXT NOT NULL,
                PRIMARY KEY (follower_id, followee_id)
            );

            CREATE INDEX idx_follows_followee ON follows(followee_id);

            CREATE TABLE projects (
                id          TEXT PRIMARY KEY,
                owner_id    TEXT NOT NULL REFERENCES users(id),
                title       TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE project_likes (
                project_id  TEXT NOT NULL REFERENCES projects(id),
                user_id     TEXT NOT NULL REFERENCES users(id),
                created_at  TEXT NOT NULL,
                PRIMARY KEY (project_id, user_id)
            );

            -- The pair is stored with participant_a < participant_b so the
            -- unique constraint covers the unordered pair.
            CREATE TABLE conversations (
                id               TEXT PRIMARY KEY,
                participant_a    TEXT NOT NULL REFERENCES users(id),
                participant_b    TEXT NOT NULL REFERENCES users(id),
                last_message_id  TEXT,
                last_message_at  TEXT NOT NULL,
                created_at       TEXT NOT NULL,
                UNIQUE (participant_a, participant_b)
            );

            CREATE INDEX idx_conversations_b ON conversations(participant_b);

            CREATE TABLE messages (
                id               TEXT PRIMARY KEY,
                conversation_id  TEXT NOT NULL REFERENCES conversations(id),
                sender_id        TEXT NOT NULL REFERENCES users(id),
                recipient_id     TEXT NOT NULL REFERENCES users(id),
                body             TEXT NOT NULL DEFAULT '',
                read_at          TEXT,
                created_at       TEXT NOT NULL
            );

            CREATE INDEX idx_messages_conversation ON messages(conversation_id, created_at);
            CREATE INDEX idx_messages_unread ON messages(recipient_id, read_at);

            CREATE TABLE message_attachments (
                message_id  TEXT NOT NULL REFERENCES messages(id),
                position    INTEGER NOT NULL,
                url         TEXT NOT NULL,
                name        TEXT,
                mime        TEXT,
                size        INTEGER,
                PRIMARY KEY (message_id, position)
            );

            CREATE TABLE message_reactions (
                message_id     TEXT NOT NULL REFERENCES messages(id),
                user_id        TEXT NOT NULL REFERENCES users(id),
                reaction_type  TEXT NOT NULL,
                emoji          TEXT,
                seq            INTEGER NOT NULL,
                created_at     TEXT NOT NULL,
                PRIMARY KEY (message_id, user_id)
            );

            CREATE TABLE notifications (
                id                 TEXT PRIMARY KEY,
                recipient_id       TEXT NOT NULL REFERENCES users(id),
                actor_id           TEXT NOT NULL REFERENCES users(id),
                project_id         TEXT REFERENCES projects(id),
                notification_type  TEXT NOT NULL,
                read               INTEGER NOT NULL DEFAULT 0,
                read_at            TEXT,
                created_at         TEXT NOT NULL
            );

            CREATE INDEX idx_notifications_recipient ON notifications(recipient_id, created_at);
            CREATE INDEX idx_notifications_created ON notifications(created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
