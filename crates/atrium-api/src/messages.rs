use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use atrium_db::models::NewMessage;
use atrium_types::api::{ConversationPayload, MessagePayload, SendMessageRequest};
use atrium_types::events::GatewayEvent;
use atrium_types::models::{MAX_ATTACHMENTS, MAX_MESSAGE_BODY_CHARS};

use crate::conversations::{conversation_view, load_conversation};
use crate::error::{ApiError, ApiResult};
use crate::sanitize::sanitize_message;
use crate::state::AppStateInner;

/// Trim and cut the body to the maximum length, counted in characters.
fn normalize_body(body: Option<&str>) -> String {
    let trimmed = body.map(str::trim).unwrap_or_default();
    match trimmed.char_indices().nth(MAX_MESSAGE_BODY_CHARS) {
        Some((cut, _)) => trimmed[..cut].to_string(),
        None => trimmed.to_string(),
    }
}

/// Append a message to a conversation and fan it out.
///
/// Publish order: `messages:new` to the recipient, then the recipient's
/// and the sender's `conversations:updated`. The sender gets the message
/// back in the response only.
pub fn send_message(
    state: &AppStateInner,
    caller: Uuid,
    conversation_id: Uuid,
    req: SendMessageRequest,
    now: DateTime<Utc>,
) -> ApiResult<(MessagePayload, ConversationPayload)> {
    let body = normalize_body(req.body.as_deref());

    if body.is_empty() && req.attachments.is_empty() {
        return Err(ApiError::InvalidInput("Message body or attachment is required".into()));
    }
    if req.attachments.len() > MAX_ATTACHMENTS {
        return Err(ApiError::InvalidInput(format!(
            "At most {MAX_ATTACHMENTS} attachment(s) per message"
        )));
    }
    if req.attachments.iter().any(|a| a.url.trim().is_empty()) {
        return Err(ApiError::InvalidInput("Attachment url is required".into()));
    }
    // Sizes are stored as SQLite INTEGER.
    if req.attachments.iter().any(|a| a.size.is_some_and(|s| i64::try_from(s).is_err())) {
        return Err(ApiError::InvalidInput("Attachment size is out of range".into()));
    }

    let conversation = load_conversation(state, caller, conversation_id)?;
    let recipient = conversation.other_participant(caller).ok_or_else(|| {
        ApiError::InvalidState(format!(
            "conversation {} has no participant besides {}",
            conversation.id, caller
        ))
    })?;

    let message = state.db.insert_message(&NewMessage {
        id: Uuid::new_v4(),
        conversation_id: conversation.id,
        sender_id: caller,
        recipient_id: recipient,
        body: &body,
        attachments: &req.attachments,
        created_at: now,
    })?;
    debug!("{} -> {} in {}: message {}", caller, recipient, conversation.id, message.id);

    // Re-read so both views carry the new last-message pointer.
    let conversation = load_conversation(state, caller, conversation_id)?;
    let sender_view = conversation_view(state, &conversation, caller)?;
    let recipient_view = conversation_view(state, &conversation, recipient)?;

    state
        .dispatcher
        .publish(recipient, GatewayEvent::MessageNew(sanitize_message(&message, recipient)));
    state
        .dispatcher
        .publish(recipient, GatewayEvent::ConversationUpdated(recipient_view));
    state
        .dispatcher
        .publish(caller, GatewayEvent::ConversationUpdated(sender_view.clone()));

    Ok((sanitize_message(&message, caller), sender_view))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::{mark_read, start_conversation};
    use crate::test_support::{drain, follow, seed_user, test_state};
    use atrium_types::models::Attachment;

    fn open(state: &AppStateInner) -> (Uuid, Uuid, Uuid) {
        let ada = seed_user(state, "ada");
        let bob = seed_user(state, "bob");
        follow(state, ada, bob);
        let (view, _) = start_conversation(state, ada, &bob.to_string(), Utc::now()).unwrap();
        (ada, bob, view.id)
    }

    fn request(body: Option<&str>, attachments: Vec<Attachment>) -> SendMessageRequest {
        SendMessageRequest {
            body: body.map(String::from),
            attachments,
        }
    }

    fn photo() -> Attachment {
        Attachment {
            url: "uploads/messages/cat.png".into(),
            name: Some("cat.png".into()),
            mime: Some("image/png".into()),
            size: Some(2048),
        }
    }

    #[test]
    fn body_is_trimmed_and_truncated_by_characters() {
        assert_eq!(normalize_body(Some("  hi  ")), "hi");
        assert_eq!(normalize_body(None), "");

        let long = "é".repeat(MAX_MESSAGE_BODY_CHARS + 1000);
        let cut = normalize_body(Some(&long));
        assert_eq!(cut.chars().count(), MAX_MESSAGE_BODY_CHARS);
    }

    #[test]
    fn empty_message_is_rejected() {
        let state = test_state();
        let (ada, _, conversation) = open(&state);

        for body in [None, Some(""), Some("   \n\t")] {
            assert!(matches!(
                send_message(&state, ada, conversation, request(body, vec![]), Utc::now()),
                Err(ApiError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn attachment_only_message_has_empty_body() {
        let state = test_state();
        let (ada, _, conversation) = open(&state);

        let (message, _) = send_message(&state, ada, conversation, request(None, vec![photo()]), Utc::now()).unwrap();
        assert_eq!(message.body, "");
        assert_eq!(message.attachments, vec![photo()]);
    }

    #[test]
    fn attachment_limits_are_enforced() {
        let state = test_state();
        let (ada, _, conversation) = open(&state);

        let too_many = request(Some("hi"), vec![photo(); MAX_ATTACHMENTS + 1]);
        assert!(matches!(
            send_message(&state, ada, conversation, too_many, Utc::now()),
            Err(ApiError::InvalidInput(_))
        ));

        let mut blank = photo();
        blank.url = " ".into();
        assert!(matches!(
            send_message(&state, ada, conversation, request(Some("hi"), vec![blank]), Utc::now()),
            Err(ApiError::InvalidInput(_))
        ));
    }

    #[test]
    fn oversized_attachment_size_is_rejected_not_wrapped() {
        let state = test_state();
        let (ada, _, conversation) = open(&state);

        let mut huge = photo();
        huge.size = Some(u64::MAX);
        assert!(matches!(
            send_message(&state, ada, conversation, request(Some("hi"), vec![huge]), Utc::now()),
            Err(ApiError::InvalidInput(_))
        ));
        assert!(crate::conversations::get_messages(&state, ada, conversation, None, None).unwrap().is_empty());

        let mut largest = photo();
        largest.size = Some(i64::MAX as u64);
        let (message, _) =
            send_message(&state, ada, conversation, request(None, vec![largest]), Utc::now()).unwrap();
        assert_eq!(message.attachments[0].size, Some(i64::MAX as u64));
    }

    #[test]
    fn outsiders_cannot_post() {
        let state = test_state();
        let (_, _, conversation) = open(&state);
        let eve = seed_user(&state, "eve");

        assert!(matches!(
            send_message(&state, eve, conversation, request(Some("hi"), vec![]), Utc::now()),
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            send_message(&state, eve, Uuid::new_v4(), request(Some("hi"), vec![]), Utc::now()),
            Err(ApiError::NotFound("conversation"))
        ));
    }

    #[test]
    fn long_body_is_stored_truncated() {
        let state = test_state();
        let (ada, bob, conversation) = open(&state);

        let long = "x".repeat(5000);
        let (message, _) = send_message(&state, ada, conversation, request(Some(&long), vec![]), Utc::now()).unwrap();
        assert_eq!(message.body.chars().count(), 4000);

        let stored = crate::conversations::get_messages(&state, bob, conversation, None, None).unwrap();
        assert_eq!(stored[0].body.len(), 4000);
    }

    #[test]
    fn delivery_order_and_unread_round_trip() {
        let state = test_state();
        let (ada, bob, conversation) = open(&state);
        let (_a, mut ada_rx) = state.dispatcher.registry().register(ada);
        let (_b1, mut bob_phone) = state.dispatcher.registry().register(bob);
        let (_b2, mut bob_laptop) = state.dispatcher.registry().register(bob);

        let (sent, sender_view) =
            send_message(&state, ada, conversation, request(Some("hello"), vec![]), Utc::now()).unwrap();
        assert!(sent.is_mine);
        assert_eq!(sender_view.unread_count, 0);
        assert_eq!(sender_view.last_message.as_ref().unwrap().id, sent.id);

        for rx in [&mut bob_phone, &mut bob_laptop] {
            let events = drain(rx);
            assert_eq!(events.len(), 2);
            match &events[0] {
                GatewayEvent::MessageNew(m) => {
                    assert_eq!(m.id, sent.id);
                    assert!(!m.is_mine);
                }
                other => panic!("expected messages:new, got {}", other.name()),
            }
            assert!(matches!(&events[1], GatewayEvent::ConversationUpdated(c) if c.unread_count == 1));
        }

        let ada_events = drain(&mut ada_rx);
        assert!(matches!(&ada_events[..], [GatewayEvent::ConversationUpdated(c)] if c.unread_count == 0));

        mark_read(&state, bob, conversation, Utc::now()).unwrap();
        let ada_events = drain(&mut ada_rx);
        assert!(matches!(&ada_events[..], [GatewayEvent::MessagesRead(r)] if r.reader_id == bob));
        let bob_events = drain(&mut bob_phone);
        assert!(matches!(&bob_events[..], [GatewayEvent::ConversationUpdated(c)] if c.unread_count == 0));
    }

    #[test]
    fn degenerate_conversation_is_an_invalid_state() {
        let state = test_state();
        let ada = seed_user(&state, "ada");
        let (conversation, _) = state.db.find_or_create_conversation(ada, ada, Utc::now()).unwrap();

        assert!(matches!(
            send_message(&state, ada, conversation.id, request(Some("echo"), vec![]), Utc::now()),
            Err(ApiError::InvalidState(_))
        ));
    }
}
