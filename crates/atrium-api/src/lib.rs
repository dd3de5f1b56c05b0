//! Messaging and notification services plus the HTTP handlers that expose
//! them. Services are synchronous (they sit on SQLite); handlers move them
//! onto the blocking pool.

pub mod conversations;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod reactions;
pub mod routes;
pub mod sanitize;
pub mod social;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::router;
pub use state::{AppState, AppStateInner};
