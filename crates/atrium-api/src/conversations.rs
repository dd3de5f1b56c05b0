use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use atrium_db::models::ConversationRow;
use atrium_types::api::{ConversationPayload, MessagePayload, MessagesReadPayload};
use atrium_types::events::GatewayEvent;

use crate::error::{ApiError, ApiResult};
use crate::sanitize::{sanitize_message, summarize_user};
use crate::state::AppStateInner;

pub const DEFAULT_MESSAGE_PAGE: u32 = 40;
pub const MAX_MESSAGE_PAGE: u32 = 200;

/// Parse a client-supplied page size. Missing, unparseable or zero values
/// fall back to `default`; anything else is clamped to `[1, max]`.
pub fn page_limit(raw: Option<&str>, default: u32, max: u32) -> u32 {
    match raw.and_then(|v| v.trim().parse::<i64>().ok()) {
        None | Some(0) => default,
        Some(n) => n.clamp(1, max as i64) as u32,
    }
}

/// Load a conversation the caller takes part in.
pub(crate) fn load_conversation(
    state: &AppStateInner,
    caller: Uuid,
    conversation_id: Uuid,
) -> ApiResult<ConversationRow> {
    let conversation = state
        .db
        .get_conversation(conversation_id)?
        .ok_or(ApiError::NotFound("conversation"))?;

    if !conversation.has_participant(caller) {
        return Err(ApiError::Forbidden("not a participant in this conversation"));
    }
    Ok(conversation)
}

/// Conversation summary as seen by `viewer`, with a freshly computed
/// unread count.
pub(crate) fn conversation_view(
    state: &AppStateInner,
    conversation: &ConversationRow,
    viewer: Uuid,
) -> ApiResult<ConversationPayload> {
    let unread = state
        .db
        .unread_counts(viewer)?
        .get(&conversation.id)
        .copied()
        .unwrap_or(0);
    build_view(state, conversation, viewer, unread)
}

fn build_view(
    state: &AppStateInner,
    conversation: &ConversationRow,
    viewer: Uuid,
    unread_count: u64,
) -> ApiResult<ConversationPayload> {
    let mut participants = Vec::with_capacity(2);
    for user_id in conversation.participants() {
        match state.db.get_user(user_id, viewer)? {
            Some(user) => participants.push(summarize_user(user)),
            None => warn!("Conversation {} references missing user {}", conversation.id, user_id),
        }
    }

    let last_message = match conversation.last_message_id {
        Some(message_id) => state
            .db
            .get_message(message_id)?
            .map(|m| sanitize_message(&m, viewer)),
        None => None,
    };

    Ok(ConversationPayload {
        id: conversation.id,
        participants,
        last_message,
        last_message_at: conversation.last_message_at,
        unread_count,
    })
}

pub fn list_conversations(state: &AppStateInner, caller: Uuid) -> ApiResult<Vec<ConversationPayload>> {
    let rows = state.db.list_conversations_for(caller)?;
    let unread = state.db.unread_counts(caller)?;

    rows.iter()
        .map(|row| {
            let count = unread.get(&row.id).copied().unwrap_or(0);
            build_view(state, row, caller, count)
        })
        .collect()
}

/// Find or create the conversation between the caller and `target`.
/// Only users connected by a follow in either direction may talk.
/// Returns the caller's view and whether the conversation is new.
pub fn start_conversation(
    state: &AppStateInner,
    caller: Uuid,
    target: &str,
    now: DateTime<Utc>,
) -> ApiResult<(ConversationPayload, bool)> {
    let target: Uuid = target
        .trim()
        .parse()
        .map_err(|_| ApiError::InvalidTarget("Invalid user id".into()))?;
    if target == caller {
        return Err(ApiError::InvalidTarget("You cannot message yourself".into()));
    }
    if !state.db.user_exists(target)? {
        return Err(ApiError::NotFound("user"));
    }
    if !state.db.connected_either_way(caller, target)? {
        return Err(ApiError::Forbidden("Messaging is allowed only between followers"));
    }

    let (conversation, created) = state.db.find_or_create_conversation(caller, target, now)?;
    if created {
        info!("Conversation {} opened between {} and {}", conversation.id, caller, target);
    }

    let caller_view = conversation_view(state, &conversation, caller)?;
    let target_view = conversation_view(state, &conversation, target)?;

    state
        .dispatcher
        .publish(caller, GatewayEvent::ConversationUpdated(caller_view.clone()));
    state
        .dispatcher
        .publish(target, GatewayEvent::ConversationUpdated(target_view));

    Ok((caller_view, created))
}

/// One page of history, oldest first. `before` is an RFC 3339 timestamp;
/// a value that does not parse is ignored.
pub fn get_messages(
    state: &AppStateInner,
    caller: Uuid,
    conversation_id: Uuid,
    before: Option<&str>,
    limit: Option<&str>,
) -> ApiResult<Vec<MessagePayload>> {
    let conversation = load_conversation(state, caller, conversation_id)?;

    let before = before.and_then(|raw| match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            debug!("Ignoring unparseable cursor {:?}: {}", raw, e);
            None
        }
    });
    let limit = page_limit(limit, DEFAULT_MESSAGE_PAGE, MAX_MESSAGE_PAGE);

    let rows = state.db.list_messages(conversation.id, before, limit)?;
    Ok(rows.iter().map(|m| sanitize_message(m, caller)).collect())
}

/// Mark everything addressed to the caller in the conversation as read.
/// Returns the number of messages that changed and the caller's
/// refreshed view.
pub fn mark_read(
    state: &AppStateInner,
    caller: Uuid,
    conversation_id: Uuid,
    now: DateTime<Utc>,
) -> ApiResult<(usize, ConversationPayload)> {
    let conversation = load_conversation(state, caller, conversation_id)?;
    let updated = state.db.mark_conversation_read(conversation.id, caller, now)?;

    if let Some(other) = conversation.other_participant(caller) {
        state.dispatcher.publish(
            other,
            GatewayEvent::MessagesRead(MessagesReadPayload {
                conversation_id: conversation.id,
                reader_id: caller,
            }),
        );
    }

    let view = conversation_view(state, &conversation, caller)?;
    state
        .dispatcher
        .publish(caller, GatewayEvent::ConversationUpdated(view.clone()));

    Ok((updated, view))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::send_message;
    use crate::test_support::{drain, follow, seed_user, test_state};
    use atrium_types::api::SendMessageRequest;
    use chrono::Duration;

    fn text(body: &str) -> SendMessageRequest {
        SendMessageRequest {
            body: Some(body.to_string()),
            attachments: vec![],
        }
    }

    #[test]
    fn page_limit_defaults_and_clamps() {
        assert_eq!(page_limit(None, 40, 200), 40);
        assert_eq!(page_limit(Some("abc"), 40, 200), 40);
        assert_eq!(page_limit(Some("0"), 40, 200), 40);
        assert_eq!(page_limit(Some("-5"), 40, 200), 1);
        assert_eq!(page_limit(Some("1000"), 40, 200), 200);
        assert_eq!(page_limit(Some(" 25 "), 40, 200), 25);
    }

    #[test]
    fn strangers_cannot_start_a_conversation() {
        let state = test_state();
        let ada = seed_user(&state, "ada");
        let bob = seed_user(&state, "bob");

        let err = start_conversation(&state, ada, &bob.to_string(), Utc::now()).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
        assert!(state.db.list_conversations_for(ada).unwrap().is_empty());
    }

    #[test]
    fn start_conversation_validates_target() {
        let state = test_state();
        let ada = seed_user(&state, "ada");

        assert!(matches!(
            start_conversation(&state, ada, "not-an-id", Utc::now()),
            Err(ApiError::InvalidTarget(_))
        ));
        assert!(matches!(
            start_conversation(&state, ada, &ada.to_string(), Utc::now()),
            Err(ApiError::InvalidTarget(_))
        ));
        assert!(matches!(
            start_conversation(&state, ada, &Uuid::new_v4().to_string(), Utc::now()),
            Err(ApiError::NotFound("user"))
        ));
    }

    #[test]
    fn one_way_follow_is_enough_and_repeat_returns_same_conversation() {
        let state = test_state();
        let ada = seed_user(&state, "ada");
        let bob = seed_user(&state, "bob");
        follow(&state, bob, ada);
        let (_conn, mut bob_rx) = state.dispatcher.registry().register(bob);

        let (first, created) = start_conversation(&state, ada, &bob.to_string(), Utc::now()).unwrap();
        assert!(created);
        assert_eq!(first.participants.len(), 2);
        assert_eq!(first.unread_count, 0);
        assert!(first.last_message.is_none());

        let events = drain(&mut bob_rx);
        assert!(matches!(&events[..], [GatewayEvent::ConversationUpdated(c)] if c.id == first.id));

        let (second, created) = start_conversation(&state, bob, &ada.to_string(), Utc::now()).unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);
    }

    #[test]
    fn participant_summaries_are_viewer_relative() {
        let state = test_state();
        let ada = seed_user(&state, "ada");
        let bob = seed_user(&state, "bob");
        follow(&state, ada, bob);

        let (view, _) = start_conversation(&state, ada, &bob.to_string(), Utc::now()).unwrap();
        let bob_summary = view.participants.iter().find(|p| p.id == bob).unwrap();
        assert!(bob_summary.is_following);
        assert_eq!(bob_summary.followers_count, 1);

        let conversation = state.db.get_conversation(view.id).unwrap().unwrap();
        let bobs_view = conversation_view(&state, &conversation, bob).unwrap();
        let ada_summary = bobs_view.participants.iter().find(|p| p.id == ada).unwrap();
        assert!(!ada_summary.is_following);
    }

    #[test]
    fn history_is_ascending_clamped_and_pageable() {
        let state = test_state();
        let ada = seed_user(&state, "ada");
        let bob = seed_user(&state, "bob");
        follow(&state, ada, bob);
        let (view, _) = start_conversation(&state, ada, &bob.to_string(), Utc::now()).unwrap();

        let start = Utc::now() - Duration::minutes(10);
        for i in 0..5 {
            send_message(&state, ada, view.id, text(&format!("m{i}")), start + Duration::seconds(i)).unwrap();
        }

        let all = get_messages(&state, bob, view.id, None, None).unwrap();
        let bodies: Vec<&str> = all.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["m0", "m1", "m2", "m3", "m4"]);

        let latest = get_messages(&state, bob, view.id, None, Some("2")).unwrap();
        let bodies: Vec<&str> = latest.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["m3", "m4"]);

        let cursor = latest[0].created_at.to_rfc3339();
        let older = get_messages(&state, bob, view.id, Some(&cursor), Some("2")).unwrap();
        let bodies: Vec<&str> = older.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["m1", "m2"]);

        let ignored = get_messages(&state, bob, view.id, Some("yesterday"), None).unwrap();
        assert_eq!(ignored.len(), 5);
    }

    #[test]
    fn history_requires_membership() {
        let state = test_state();
        let ada = seed_user(&state, "ada");
        let bob = seed_user(&state, "bob");
        let eve = seed_user(&state, "eve");
        follow(&state, ada, bob);
        let (view, _) = start_conversation(&state, ada, &bob.to_string(), Utc::now()).unwrap();

        assert!(matches!(
            get_messages(&state, eve, view.id, None, None),
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            get_messages(&state, ada, Uuid::new_v4(), None, None),
            Err(ApiError::NotFound("conversation"))
        ));
        assert!(matches!(
            mark_read(&state, eve, view.id, Utc::now()),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn mark_read_is_idempotent_and_notifies_the_sender() {
        let state = test_state();
        let ada = seed_user(&state, "ada");
        let bob = seed_user(&state, "bob");
        follow(&state, ada, bob);
        let (view, _) = start_conversation(&state, ada, &bob.to_string(), Utc::now()).unwrap();
        send_message(&state, ada, view.id, text("one"), Utc::now()).unwrap();
        send_message(&state, ada, view.id, text("two"), Utc::now()).unwrap();

        let (_a, mut ada_rx) = state.dispatcher.registry().register(ada);
        let (_b, mut bob_rx) = state.dispatcher.registry().register(bob);

        let (updated, bobs_view) = mark_read(&state, bob, view.id, Utc::now()).unwrap();
        assert_eq!(updated, 2);
        assert_eq!(bobs_view.unread_count, 0);
        assert!(get_messages(&state, bob, view.id, None, None)
            .unwrap()
            .iter()
            .all(|m| m.read_at.is_some()));

        let ada_events = drain(&mut ada_rx);
        assert!(matches!(
            &ada_events[..],
            [GatewayEvent::MessagesRead(r)] if r.reader_id == bob && r.conversation_id == view.id
        ));
        let bob_events = drain(&mut bob_rx);
        assert!(matches!(&bob_events[..], [GatewayEvent::ConversationUpdated(c)] if c.unread_count == 0));

        let (again, _) = mark_read(&state, bob, view.id, Utc::now()).unwrap();
        assert_eq!(again, 0);
    }

    #[test]
    fn list_orders_by_latest_activity_with_unread_counts() {
        let state = test_state();
        let ada = seed_user(&state, "ada");
        let bob = seed_user(&state, "bob");
        let cid = seed_user(&state, "cid");
        follow(&state, ada, bob);
        follow(&state, ada, cid);

        let base = Utc::now() - Duration::hours(1);
        let (with_bob, _) = start_conversation(&state, ada, &bob.to_string(), base).unwrap();
        let (with_cid, _) = start_conversation(&state, ada, &cid.to_string(), base + Duration::seconds(1)).unwrap();
        send_message(&state, bob, with_bob.id, text("ping"), base + Duration::seconds(5)).unwrap();

        let listed = list_conversations(&state, ada).unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![with_bob.id, with_cid.id]);
        assert_eq!(listed[0].unread_count, 1);
        assert_eq!(listed[0].last_message.as_ref().unwrap().body, "ping");
        assert!(!listed[0].last_message.as_ref().unwrap().is_mine);
        assert_eq!(listed[1].unread_count, 0);

        assert!(list_conversations(&state, Uuid::new_v4()).unwrap().is_empty());
    }
}
