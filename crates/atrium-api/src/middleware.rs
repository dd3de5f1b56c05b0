use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::debug;
use uuid::Uuid;

use atrium_gateway::handshake::verify_token;

use crate::error::ApiError;
use crate::state::{AppState, blocking};

/// The authenticated caller, inserted as a request extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub Uuid);

/// Extract and validate the JWT from the Authorization header, then make
/// sure the user it names still exists.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let user_id = verify_token(Some(token), &state.jwt_secret).map_err(|e| {
        debug!("Rejected bearer token: {}", e);
        ApiError::Unauthorized
    })?;

    let exists = blocking(&state, move |s| Ok(s.db.user_exists(user_id)?)).await?;
    if !exists {
        debug!("Token for unknown user {}", user_id);
        return Err(ApiError::Unauthorized);
    }

    req.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(req).await)
}
