//! Bearer-token authentication extractor for the admin API.
use axum::{
    Extension,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
};
use std::future::Future;

use crate::SharedState;

/// Axum extractor that checks `Authorization: Bearer <token>` against the configured
/// admin token. With no token configured every request passes.
pub struct Authenticated;

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> {
        Box::pin(async move {
            let Extension(app_state): Extension<SharedState> =
                Extension::from_request_parts(parts, state)
                    .await
                    .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "missing state"))?;

            let Some(expected) = app_state.config.api_token.as_deref() else {
                return Ok(Authenticated);
            };

            let auth_header = parts
                .headers
                .get(axum::http::header::AUTHORIZATION)
                .ok_or((StatusCode::UNAUTHORIZED, "missing Authorization header"))?
                .to_str()
                .map_err(|_| (StatusCode::BAD_REQUEST, "invalid Authorization header"))?;

            let token = auth_header
                .strip_prefix("Bearer ")
                .ok_or((StatusCode::UNAUTHORIZED, "expected Bearer token"))?;

            if !token_matches(expected, token.trim()) {
                return Err((StatusCode::UNAUTHORIZED, "invalid token"));
            }
            Ok(Authenticated)
        })
    }
}

/// Comparison time does not depend on where the first mismatch is.
pub fn token_matches(expected: &str, given: &str) -> bool {
    let (a, b) = (expected.as_bytes(), given.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_comparison() {
        assert!(token_matches("s3cret", "s3cret"));
        assert!(!token_matches("s3cret", "s3cres"));
        assert!(!token_matches("s3cret", "s3cret-longer"));
        assert!(!token_matches("s3cret", ""));
    }
}
