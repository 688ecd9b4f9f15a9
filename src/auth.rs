//! Caller identity. Credentials are issued elsewhere; here a bearer token is
//! the caller's user id, resolved against the user directory.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use uuid::Uuid;

use crate::{
    directory::{User, UserDirectory},
    errors::OrderError,
    state::AppState,
};

/// The authenticated user behind a request.
#[derive(Debug, Clone)]
pub struct Caller(pub User);

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

pub fn resolve(directory: &dyn UserDirectory, token: &str) -> Result<User, OrderError> {
    Uuid::parse_str(token.trim())
        .ok()
        .and_then(|id| directory.user(id))
        .ok_or(OrderError::NotAuthenticated)
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = OrderError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(OrderError::NotAuthenticated)?;
        resolve(state.directory.as_ref(), token).map(Caller)
    }
}
