use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;

use crate::error::AppError;
use crate::state::AppState;

/// Proof that the request carried the configured admin bearer token.
pub struct AdminAuth;

impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(header::AUTHORIZATION)
            .ok_or(AppError::Unauthorized("Missing Authorization header"))?
            .to_str()
            .map_err(|_| AppError::Unauthorized("Invalid Authorization header value"))?;

        let token = value
            .strip_prefix("Bearer ")
            .ok_or(AppError::Unauthorized("Expected Bearer token"))?;

        if !tokens_match(token.trim().as_bytes(), state.admin_token.as_bytes()) {
            return Err(AppError::Unauthorized("Invalid admin token"));
        }
        Ok(AdminAuth)
    }
}

/// Length-independent comparison so timing does not leak matching prefixes.
fn tokens_match(given: &[u8], expected: &[u8]) -> bool {
    let mut diff = given.len() ^ expected.len();
    for (i, b) in expected.iter().enumerate() {
        diff |= usize::from(given.get(i).copied().unwrap_or(0) ^ b);
    }
    diff == 0
}
