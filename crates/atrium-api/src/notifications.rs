use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use atrium_db::models::NewNotification;
use atrium_types::api::NotificationPayload;
use atrium_types::events::GatewayEvent;
use atrium_types::models::{NOTIFICATION_RETENTION_DAYS, NotificationType};

use crate::conversations::page_limit;
use crate::error::{ApiError, ApiResult};
use crate::sanitize::sanitize_notification;
use crate::state::AppStateInner;

pub const DEFAULT_NOTIFICATION_PAGE: u32 = 30;
pub const MAX_NOTIFICATION_PAGE: u32 = 100;

/// Oldest `created_at` still visible at `now`.
pub fn retention_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(NOTIFICATION_RETENTION_DAYS)
}

/// Persist a notification and push it to the recipient. Users are never
/// notified about their own actions: that case stores nothing and
/// returns `None`.
pub fn create_notification(
    state: &AppStateInner,
    recipient: Uuid,
    actor: Uuid,
    notification_type: NotificationType,
    project: Option<Uuid>,
    now: DateTime<Utc>,
) -> ApiResult<Option<NotificationPayload>> {
    if recipient == actor {
        return Ok(None);
    }

    let row = state.db.insert_notification(&NewNotification {
        id: Uuid::new_v4(),
        recipient_id: recipient,
        actor_id: actor,
        project_id: project,
        notification_type,
        created_at: now,
    })?;
    debug!("{} notification {} for {} from {}", notification_type, row.id, recipient, actor);

    let payload = sanitize_notification(row);
    state
        .dispatcher
        .publish(recipient, GatewayEvent::NotificationNew(payload.clone()));

    Ok(Some(payload))
}

pub fn list_notifications(
    state: &AppStateInner,
    caller: Uuid,
    limit: Option<&str>,
    now: DateTime<Utc>,
) -> ApiResult<Vec<NotificationPayload>> {
    let limit = page_limit(limit, DEFAULT_NOTIFICATION_PAGE, MAX_NOTIFICATION_PAGE);
    let rows = state
        .db
        .list_notifications(caller, limit, retention_cutoff(now))?;
    Ok(rows.into_iter().map(sanitize_notification).collect())
}

pub fn mark_read(
    state: &AppStateInner,
    caller: Uuid,
    notification_id: Uuid,
    now: DateTime<Utc>,
) -> ApiResult<NotificationPayload> {
    state
        .db
        .mark_notification_read(caller, notification_id, now, retention_cutoff(now))?
        .map(sanitize_notification)
        .ok_or(ApiError::NotFound("notification"))
}

pub fn mark_all_read(state: &AppStateInner, caller: Uuid, now: DateTime<Utc>) -> ApiResult<usize> {
    Ok(state.db.mark_all_notifications_read(caller, now)?)
}

pub fn delete_notification(state: &AppStateInner, caller: Uuid, notification_id: Uuid) -> ApiResult<()> {
    if state.db.delete_notification(caller, notification_id)? {
        Ok(())
    } else {
        Err(ApiError::NotFound("notification"))
    }
}

/// Delete everything past the retention window. Returns the count.
pub fn purge_expired(state: &AppStateInner, now: DateTime<Utc>) -> ApiResult<usize> {
    let removed = state.db.purge_notifications_before(retention_cutoff(now))?;
    if removed > 0 {
        info!("Purged {} expired notifications", removed);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{drain, seed_user, test_state};

    #[test]
    fn self_notification_is_suppressed() {
        let state = test_state();
        let ada = seed_user(&state, "ada");
        let (_c, mut rx) = state.dispatcher.registry().register(ada);

        let created = create_notification(&state, ada, ada, NotificationType::Follow, None, Utc::now()).unwrap();
        assert!(created.is_none());
        assert!(list_notifications(&state, ada, None, Utc::now()).unwrap().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn new_notification_is_pushed_to_every_session() {
        let state = test_state();
        let ada = seed_user(&state, "ada");
        let bob = seed_user(&state, "bob");
        let (_c1, mut first) = state.dispatcher.registry().register(ada);
        let (_c2, mut second) = state.dispatcher.registry().register(ada);

        let created = create_notification(&state, ada, bob, NotificationType::Follow, None, Utc::now())
            .unwrap()
            .unwrap();
        assert!(!created.read);
        assert_eq!(created.actor.as_ref().unwrap().username, "bob");
        assert!(created.project.is_none());

        for rx in [&mut first, &mut second] {
            assert!(matches!(
                &drain(rx)[..],
                [GatewayEvent::NotificationNew(n)] if n.id == created.id
            ));
        }
    }

    #[test]
    fn expired_notifications_disappear() {
        let state = test_state();
        let ada = seed_user(&state, "ada");
        let bob = seed_user(&state, "bob");
        let now = Utc::now();

        let old = create_notification(&state, ada, bob, NotificationType::Follow, None, now - Duration::days(7))
            .unwrap()
            .unwrap();
        let fresh = create_notification(&state, ada, bob, NotificationType::Follow, None, now - Duration::days(5))
            .unwrap()
            .unwrap();

        let listed: Vec<Uuid> = list_notifications(&state, ada, None, now)
            .unwrap()
            .iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(listed, vec![fresh.id]);
        assert!(matches!(mark_read(&state, ada, old.id, now), Err(ApiError::NotFound(_))));

        assert_eq!(purge_expired(&state, now).unwrap(), 1);
        assert_eq!(purge_expired(&state, now).unwrap(), 0);
    }

    #[test]
    fn list_is_clamped_and_newest_first() {
        let state = test_state();
        let ada = seed_user(&state, "ada");
        let bob = seed_user(&state, "bob");
        let now = Utc::now();
        for minutes in (0..5).rev() {
            create_notification(&state, ada, bob, NotificationType::Follow, None, now - Duration::minutes(minutes))
                .unwrap();
        }

        let two = list_notifications(&state, ada, Some("2"), now).unwrap();
        assert_eq!(two.len(), 2);
        assert!(two[0].created_at > two[1].created_at);
        assert_eq!(list_notifications(&state, ada, Some("-3"), now).unwrap().len(), 1);
        assert_eq!(list_notifications(&state, ada, Some("500"), now).unwrap().len(), 5);
    }

    #[test]
    fn read_state_and_ownership() {
        let state = test_state();
        let ada = seed_user(&state, "ada");
        let bob = seed_user(&state, "bob");
        let now = Utc::now();
        let first = create_notification(&state, ada, bob, NotificationType::Follow, None, now)
            .unwrap()
            .unwrap();
        create_notification(&state, ada, bob, NotificationType::Follow, None, now).unwrap();

        assert!(matches!(mark_read(&state, bob, first.id, now), Err(ApiError::NotFound(_))));
        let read = mark_read(&state, ada, first.id, now).unwrap();
        assert!(read.read && read.read_at.is_some());

        assert_eq!(mark_all_read(&state, ada, now).unwrap(), 1);
        assert_eq!(mark_all_read(&state, ada, now).unwrap(), 0);
        assert!(list_notifications(&state, ada, None, now).unwrap().iter().all(|n| n.read));

        assert!(matches!(delete_notification(&state, bob, first.id), Err(ApiError::NotFound(_))));
        delete_notification(&state, ada, first.id).unwrap();
        assert_eq!(list_notifications(&state, ada, None, now).unwrap().len(), 1);
    }
}
