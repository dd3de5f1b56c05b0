use std::sync::Arc;

use tracing::error;

use atrium_db::Database;
use atrium_gateway::Dispatcher;

use crate::error::{ApiError, ApiResult};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
}

impl AppStateInner {
    pub fn new(db: Database, dispatcher: Dispatcher, jwt_secret: impl Into<String>) -> AppState {
        Arc::new(Self {
            db,
            dispatcher,
            jwt_secret: jwt_secret.into(),
        })
    }
}

/// Run a service call off the async runtime. Every service touches SQLite
/// synchronously, so handlers go through here.
pub async fn blocking<T, F>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&AppStateInner) -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::InvalidState(format!("blocking task failed: {e}"))
        })?
}
