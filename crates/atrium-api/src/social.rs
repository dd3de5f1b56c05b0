//! Follow and like actions. They live here only because they produce
//! notifications; the rest of the profile surface is elsewhere.

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use atrium_types::models::NotificationType;

use crate::error::{ApiError, ApiResult};
use crate::notifications::create_notification;
use crate::state::AppStateInner;

fn parse_target(caller: Uuid, raw: &str) -> ApiResult<Uuid> {
    let target: Uuid = raw
        .trim()
        .parse()
        .map_err(|_| ApiError::InvalidTarget("Invalid user id".into()))?;
    if target == caller {
        return Err(ApiError::InvalidTarget("You cannot follow yourself".into()));
    }
    Ok(target)
}

/// Returns true if the follow is new. Only a new follow notifies.
pub fn follow(state: &AppStateInner, caller: Uuid, target: &str, now: DateTime<Utc>) -> ApiResult<bool> {
    let target = parse_target(caller, target)?;
    if !state.db.user_exists(target)? {
        return Err(ApiError::NotFound("user"));
    }

    let created = state.db.follow(caller, target, now)?;
    if created {
        debug!("{} followed {}", caller, target);
        create_notification(state, target, caller, NotificationType::Follow, None, now)?;
    }
    Ok(created)
}

/// Returns true if an existing follow was removed.
pub fn unfollow(state: &AppStateInner, caller: Uuid, target: &str) -> ApiResult<bool> {
    let target = parse_target(caller, target)?;
    Ok(state.db.unfollow(caller, target)?)
}

/// Returns true if the like is new. The owner is notified unless they
/// liked their own project.
pub fn like_project(state: &AppStateInner, caller: Uuid, project_id: Uuid, now: DateTime<Utc>) -> ApiResult<bool> {
    let project = state
        .db
        .get_project(project_id)?
        .ok_or(ApiError::NotFound("project"))?;

    let created = state.db.like_project(project.id, caller, now)?;
    if created {
        create_notification(
            state,
            project.owner_id,
            caller,
            NotificationType::Like,
            Some(project.id),
            now,
        )?;
    }
    Ok(created)
}
