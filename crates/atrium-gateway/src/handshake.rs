use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use atrium_types::api::Claims;

/// Query parameters accepted on the gateway upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct HandshakeParams {
    pub token: Option<String>,
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("no credential presented")]
    MissingToken,

    #[error("invalid credential: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("credential subject is not a user id: {0:?}")]
    MalformedSubject(String),
}

/// Verify a bearer credential and return the user id it was issued for.
/// Any failure rejects the credential; there is no partial success.
pub fn verify_token(token: Option<&str>, secret: &str) -> Result<Uuid, HandshakeError> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(HandshakeError::MissingToken)?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;

    let sub = token_data.claims.sub;
    sub.parse::<Uuid>()
        .map_err(|_| HandshakeError::MalformedSubject(sub))
}
