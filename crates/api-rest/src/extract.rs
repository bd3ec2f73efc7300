//! Bearer-token authentication as an axum extractor.

use crate::{error::ApiError, AppState};
use api_shared::auth::bearer_token;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use filehub_core::Identity;

/// The verified caller. Extraction fails with 401 before the handler body runs, so a request
/// without a valid token never reaches the file service.
#[derive(Clone, Debug)]
pub struct AuthUser(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(ApiError::Unauthorized("Authorization header required"))?;

        let token = header
            .to_str()
            .ok()
            .and_then(bearer_token)
            .ok_or(ApiError::Unauthorized("Invalid token"))?;

        let identity = state.tokens.authenticate(token).map_err(|e| {
            tracing::debug!(error = %e, "rejected bearer token");
            ApiError::Unauthorized("Invalid token")
        })?;

        Ok(AuthUser(identity))
    }
}
