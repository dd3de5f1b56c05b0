//! Row -> wire payload conversion. Everything viewer-dependent
//! (`isMine`, `userReaction`, `isFollowing`) is computed here.

use std::collections::BTreeMap;

use uuid::Uuid;

use atrium_db::models::{ActorRow, MessageRow, NotificationRow, ProjectRow, ReactionRow, UserRow};
use atrium_types::api::{
    ActorSummary, MessagePayload, NotificationPayload, ProjectSummary, ReactionPayload, UserSummary,
};

pub fn summarize_user(row: UserRow) -> UserSummary {
    UserSummary {
        id: row.id,
        name: row.name,
        username: row.username,
        avatar: row.avatar,
        role: row.role,
        bio: row.bio,
        followers_count: row.followers_count,
        is_following: row.viewer_follows,
    }
}

pub fn summarize_actor(row: ActorRow) -> ActorSummary {
    ActorSummary {
        id: row.id,
        name: row.name,
        username: row.username,
        avatar: row.avatar,
        role: row.role,
    }
}

pub fn summarize_project(row: ProjectRow) -> ProjectSummary {
    ProjectSummary {
        id: row.id,
        title: row.title,
    }
}

fn reaction_payload(row: &ReactionRow) -> ReactionPayload {
    ReactionPayload {
        user_id: row.user_id,
        reaction_type: row.reaction_type,
        emoji: row.emoji.clone(),
    }
}

/// Message as seen by `viewer`.
pub fn sanitize_message(row: &MessageRow, viewer: Uuid) -> MessagePayload {
    let reactions: Vec<ReactionPayload> = row.reactions.iter().map(reaction_payload).collect();

    let mut reaction_counts = BTreeMap::new();
    for reaction in &reactions {
        *reaction_counts.entry(reaction.reaction_type).or_insert(0) += 1;
    }

    let user_reaction = reactions.iter().find(|r| r.user_id == viewer).cloned();

    MessagePayload {
        id: row.id,
        conversation_id: row.conversation_id,
        sender_id: row.sender_id,
        recipient_id: row.recipient_id,
        body: row.body.clone(),
        attachments: row.attachments.clone(),
        reactions,
        reaction_counts,
        user_reaction,
        read_at: row.read_at,
        created_at: row.created_at,
        is_mine: row.sender_id == viewer,
    }
}

pub fn sanitize_notification(row: NotificationRow) -> NotificationPayload {
    NotificationPayload {
        id: row.id,
        notification_type: row.notification_type,
        read: row.read,
        read_at: row.read_at,
        created_at: row.created_at,
        actor: row.actor.map(summarize_actor),
        project: row.project.map(summarize_project),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_types::models::ReactionType;
    use chrono::Utc;

    fn reaction(user_id: Uuid, reaction_type: ReactionType) -> ReactionRow {
        ReactionRow {
            user_id,
            reaction_type,
            emoji: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn message_is_viewer_relative() {
        let ada = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let carol = Uuid::new_v4();
        let row = MessageRow {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: ada,
            recipient_id: bob,
            body: "hi".into(),
            attachments: vec![],
            reactions: vec![
                reaction(bob, ReactionType::Love),
                reaction(ada, ReactionType::Like),
                reaction(carol, ReactionType::Love),
            ],
            read_at: None,
            created_at: Utc::now(),
        };

        let for_ada = sanitize_message(&row, ada);
        assert!(for_ada.is_mine);
        assert_eq!(for_ada.user_reaction.unwrap().reaction_type, ReactionType::Like);
        assert_eq!(for_ada.reaction_counts[&ReactionType::Love], 2);
        assert_eq!(for_ada.reaction_counts[&ReactionType::Like], 1);
        let order: Vec<Uuid> = for_ada.reactions.iter().map(|r| r.user_id).collect();
        assert_eq!(order, vec![bob, ada, carol]);

        let for_bob = sanitize_message(&row, bob);
        assert!(!for_bob.is_mine);
        assert_eq!(for_bob.user_reaction.unwrap().reaction_type, ReactionType::Love);

        let outsider = sanitize_message(&row, Uuid::new_v4());
        assert!(outsider.user_reaction.is_none());
    }
}
