//! Database row types. Distinct from the atrium-types payloads so the
//! storage layer stays independent of what is exposed on the wire.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use atrium_types::models::{Attachment, NotificationType, ReactionType};

pub struct NewUser<'a> {
    pub id: Uuid,
    pub name: &'a str,
    pub username: &'a str,
    pub avatar: Option<&'a str>,
    pub role: &'a str,
    pub bio: Option<&'a str>,
}

/// A user as seen by a particular viewer.
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    pub avatar: Option<String>,
    pub role: String,
    pub bio: Option<String>,
    pub followers_count: u64,
    pub viewer_follows: bool,
}

#[derive(Debug, Clone)]
pub struct ProjectRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: Uuid,
    pub participant_a: Uuid,
    pub participant_b: Uuid,
    pub last_message_id: Option<Uuid>,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ConversationRow {
    pub fn participants(&self) -> [Uuid; 2] {
        [self.participant_a, self.participant_b]
    }

    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participant_a == user_id || self.participant_b == user_id
    }

    /// The participant that is not `user_id`. `None` for a degenerate
    /// conversation whose two slots hold the same user.
    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        self.participants().into_iter().find(|p| *p != user_id)
    }
}

pub struct NewMessage<'a> {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub body: &'a str,
    pub attachments: &'a [Attachment],
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub body: String,
    pub attachments: Vec<Attachment>,
    /// In insertion order.
    pub reactions: Vec<ReactionRow>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ReactionRow {
    pub user_id: Uuid,
    pub reaction_type: ReactionType,
    pub emoji: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct NewNotification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub actor_id: Uuid,
    pub project_id: Option<Uuid>,
    pub notification_type: NotificationType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ActorRow {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    pub avatar: Option<String>,
    pub role: String,
}

#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub actor: Option<ActorRow>,
    pub project: Option<ProjectRow>,
    pub notification_type: NotificationType,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
