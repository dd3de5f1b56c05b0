use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{ConversationPayload, MessagePayload, MessagesReadPayload, NotificationPayload};

/// Events pushed over the WebSocket gateway. Delivery is best effort:
/// users without a live connection simply miss them and reconcile
/// through the HTTP list endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Sent once to a connection right after its handshake succeeds.
    #[serde(rename = "ready", rename_all = "camelCase")]
    Ready { user_id: Uuid },

    /// A message addressed to the receiving user. Never sent to the author.
    #[serde(rename = "messages:new")]
    MessageNew(MessagePayload),

    /// Conversation summary as seen by the receiving user.
    #[serde(rename = "conversations:updated")]
    ConversationUpdated(ConversationPayload),

    /// The other participant read the conversation.
    #[serde(rename = "messages:read")]
    MessagesRead(MessagesReadPayload),

    /// Reaction state of a message changed.
    #[serde(rename = "messages:reacted")]
    MessageReacted(MessagePayload),

    #[serde(rename = "notifications:new")]
    NotificationNew(NotificationPayload),
}

impl GatewayEvent {
    /// Wire name of the event, as found in the `type` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::MessageNew(_) => "messages:new",
            Self::ConversationUpdated(_) => "conversations:updated",
            Self::MessagesRead(_) => "messages:read",
            Self::MessageReacted(_) => "messages:reacted",
            Self::NotificationNew(_) => "notifications:new",
        }
    }
}
