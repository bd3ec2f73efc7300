use crate::error::{run_blocking, ApiError};
use crate::AppState;
use api_shared::auth::{check_credentials, check_password_policy, hash_password};
use api_shared::{CredentialsReq, TokenRes, UserRes};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use filehub_core::User;
use filehub_types::NonEmptyText;

const MAX_USERNAME_CHARS: usize = 64;
const INVALID_CREDENTIALS: &str = "Invalid username or password";

/// Upper bound for password hashing and user lookups.
const AUTH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = CredentialsReq,
    responses(
        (status = 201, description = "User registered", body = UserRes),
        (status = 400, description = "Invalid request body or weak password"),
        (status = 409, description = "Username already exists"),
        (status = 500, description = "Internal server error")
    )
)]
/// Register a new user
///
/// The password must be at least 8 characters long. It is stored only as an argon2id verifier.
#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<CredentialsReq>, JsonRejection>,
) -> Result<(StatusCode, Json<UserRes>), ApiError> {
    let Json(creds) = body.map_err(|_| ApiError::BadRequest("Invalid request body"))?;

    let username = NonEmptyText::bounded(&creds.username, MAX_USERNAME_CHARS)
        .map_err(|_| ApiError::BadRequest("Username is required (at most 64 characters)"))?;
    check_password_policy(&creds.password)?;

    let users = state.users.clone();
    let user = run_blocking(AUTH_TIMEOUT, move || -> Result<User, ApiError> {
        let user = User::new(username, hash_password(&creds.password)?);
        users.create(&user)?;
        Ok(user)
    })
    .await?;

    tracing::info!(user_id = %user.id, username = %user.username, "user registered");
    Ok((StatusCode::CREATED, Json(UserRes::from(&user))))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = CredentialsReq,
    responses(
        (status = 200, description = "Bearer token issued", body = TokenRes),
        (status = 400, description = "Invalid request body"),
        (status = 401, description = "Invalid username or password"),
        (status = 500, description = "Internal server error")
    )
)]
/// Log in and receive a bearer token
///
/// Unknown usernames and wrong passwords produce the same 401 response, after the same amount
/// of password-hashing work.
#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<CredentialsReq>, JsonRejection>,
) -> Result<Json<TokenRes>, ApiError> {
    let Json(creds) = body.map_err(|_| ApiError::BadRequest("Invalid request body"))?;

    let users = state.users.clone();
    let user = run_blocking(AUTH_TIMEOUT, move || -> Result<Option<User>, ApiError> {
        let user = users.find_by_username(creds.username.trim())?;
        let stored_hash = user.as_ref().map(|u| u.password_hash.as_str());
        let verified = check_credentials(&creds.password, stored_hash)?;
        Ok(user.filter(|_| verified))
    })
    .await?
    .ok_or(ApiError::Unauthorized(INVALID_CREDENTIALS))?;

    let token = state.tokens.issue(&user.id, &user.username)?;
    tracing::info!(
        user_id = %user.id,
        expires_in_secs = state.tokens.expiry().as_secs(),
        "token issued"
    );
    Ok(Json(TokenRes { token }))
}
