use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Attachment, NotificationType, ReactionType};

// -- JWT Claims --

/// Claims carried by the bearer credential. Tokens are issued by the
/// account service; this core only verifies them. `sub` is kept as a
/// string so a malformed subject is rejected explicitly rather than by
/// a generic decode failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

// -- Requests --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConversationRequest {
    #[serde(default, alias = "userId")]
    pub target_user_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
pub struct ReactRequest {
    /// Validated against [`ReactionType`] by the service so an unknown
    /// value is reported as bad input instead of a body rejection.
    #[serde(rename = "type")]
    pub reaction_type: String,
    #[serde(default)]
    pub emoji: Option<String>,
}

// -- Sanitized payloads --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    pub avatar: Option<String>,
    pub role: String,
    pub bio: Option<String>,
    pub followers_count: u64,
    /// Whether the viewing user follows this user.
    pub is_following: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorSummary {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    pub avatar: Option<String>,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub id: Uuid,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionPayload {
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub reaction_type: ReactionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub body: String,
    pub attachments: Vec<Attachment>,
    pub reactions: Vec<ReactionPayload>,
    pub reaction_counts: BTreeMap<ReactionType, usize>,
    pub user_reaction: Option<ReactionPayload>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub is_mine: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPayload {
    pub id: Uuid,
    pub participants: Vec<UserSummary>,
    pub last_message: Option<MessagePayload>,
    pub last_message_at: DateTime<Utc>,
    /// Unread messages addressed to the user this payload was built for.
    pub unread_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesReadPayload {
    pub conversation_id: Uuid,
    pub reader_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub actor: Option<ActorSummary>,
    pub project: Option<ProjectSummary>,
}

// -- Responses --

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<ConversationPayload>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub conversation: ConversationPayload,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageListResponse {
    pub messages: Vec<MessagePayload>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub message: MessagePayload,
    pub conversation: ConversationPayload,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub updated: usize,
    pub conversation: ConversationPayload,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReactResponse {
    pub message: MessagePayload,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationListResponse {
    pub notifications: Vec<NotificationPayload>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationResponse {
    pub notification: NotificationPayload,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdatedResponse {
    pub updated: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}
