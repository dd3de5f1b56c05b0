use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use atrium_types::api::{MessagePayload, ReactRequest};
use atrium_types::events::GatewayEvent;
use atrium_types::models::ReactionType;

use crate::conversations::load_conversation;
use crate::error::{ApiError, ApiResult};
use crate::sanitize::sanitize_message;
use crate::state::AppStateInner;

/// Set the caller's reaction on a message, replacing any earlier one.
/// Both participants receive `messages:reacted` with the caller's view.
pub fn react(
    state: &AppStateInner,
    caller: Uuid,
    conversation_id: Uuid,
    message_id: Uuid,
    req: ReactRequest,
    now: DateTime<Utc>,
) -> ApiResult<MessagePayload> {
    let reaction_type: ReactionType = req
        .reaction_type
        .parse()
        .map_err(|_| ApiError::InvalidInput("Invalid reaction type".into()))?;

    let emoji = match reaction_type {
        ReactionType::Emoji => {
            let glyph = req
                .emoji
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .ok_or_else(|| ApiError::InvalidInput("Emoji is required for emoji reaction".into()))?;
            Some(glyph.to_string())
        }
        _ => None,
    };

    let conversation = load_conversation(state, caller, conversation_id)?;
    let message = state
        .db
        .get_message(message_id)?
        .filter(|m| m.conversation_id == conversation.id)
        .ok_or(ApiError::NotFound("message"))?;

    let updated = state
        .db
        .upsert_reaction(message.id, caller, reaction_type, emoji.as_deref(), now)?;
    debug!("{} reacted {} to {}", caller, reaction_type, message.id);

    let payload = sanitize_message(&updated, caller);
    state
        .dispatcher
        .publish(caller, GatewayEvent::MessageReacted(payload.clone()));
    if let Some(other) = conversation.other_participant(caller) {
        state
            .dispatcher
            .publish(other, GatewayEvent::MessageReacted(payload.clone()));
    }

    Ok(payload)
}
