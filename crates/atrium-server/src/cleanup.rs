use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use atrium_api::notifications::purge_expired;
use atrium_api::state::{AppState, blocking};

/// Background task that deletes notifications past their retention window.
/// Queries already hide expired rows; this only reclaims the space.
pub async fn run_notification_sweeper(state: AppState, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        match blocking(&state, |s| purge_expired(s, Utc::now())).await {
            Ok(count) => debug!("Notification sweep removed {} rows", count),
            Err(e) => warn!("Notification sweep error: {}", e),
        }
    }
}
