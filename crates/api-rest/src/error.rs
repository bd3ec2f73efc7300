//! Mapping of service failures onto HTTP responses.
//!
//! Bodies are short fixed strings. Anything in the I/O class is logged with full detail and
//! answered with a generic 500 so that paths and internal messages never reach the client.

use api_shared::AuthError;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use filehub_core::{ErrorKind, FileServiceError, UserError};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Service(#[from] FileServiceError),
    #[error("bad request: {0}")]
    BadRequest(&'static str),
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),
    #[error("conflict: {0}")]
    Conflict(&'static str),
    #[error("upload exceeds the configured maximum")]
    PayloadTooLarge,
    #[error("multipart error: {0}")]
    Multipart(#[from] MultipartError),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<UserError> for ApiError {
    fn from(e: UserError) -> Self {
        match e {
            UserError::UsernameTaken => ApiError::Conflict("Username already exists"),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::WeakPassword => {
                ApiError::BadRequest("Password must be at least 8 characters long")
            }
            AuthError::InvalidToken(_) | AuthError::Expired => ApiError::Unauthorized("Invalid token"),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl ApiError {
    fn status_and_body(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Service(e) => match (e.kind(), e) {
                (ErrorKind::Validation, FileServiceError::PayloadTooLarge { .. }) => {
                    (StatusCode::PAYLOAD_TOO_LARGE, "File too large")
                }
                (ErrorKind::Validation, _) => (StatusCode::BAD_REQUEST, "Invalid upload"),
                (ErrorKind::Auth, _) => (StatusCode::UNAUTHORIZED, "Unauthorized"),
                (ErrorKind::NotFound, _) => (StatusCode::NOT_FOUND, "File not found"),
                (ErrorKind::Io, _) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
            },
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, *msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, *msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, *msg),
            ApiError::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, "File too large"),
            ApiError::Multipart(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                (StatusCode::PAYLOAD_TOO_LARGE, "File too large")
            }
            ApiError::Multipart(_) => (StatusCode::BAD_REQUEST, "Invalid multipart body"),
            ApiError::Timeout(_) | ApiError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        (status, body).into_response()
    }
}

/// Runs blocking store work on the blocking pool, bounded by `timeout`.
///
/// On timeout the caller gets [`ApiError::Timeout`] immediately. The blocking task itself
/// cannot be interrupted and runs to completion; the per-digest locks keep that safe.
pub async fn run_blocking<T, E, F>(timeout: Duration, f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result.map_err(Into::into),
        Ok(Err(join_error)) => Err(ApiError::Internal(format!(
            "blocking task failed: {}",
            join_error
        ))),
        Err(_) => Err(ApiError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_errors_map_by_kind() {
        let cases = [
            (
                FileServiceError::PayloadTooLarge { size: 2, max: 1 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                FileServiceError::InvalidInput("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (FileServiceError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (FileServiceError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                FileServiceError::Source(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "/secret/path unreadable",
                )),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status_and_body().0, expected);
        }
    }

    #[test]
    fn test_internal_details_are_not_exposed() {
        let err = ApiError::from(FileServiceError::Source(std::io::Error::new(
            std::io::ErrorKind::Other,
            "/secret/path unreadable",
        )));

        assert_eq!(err.status_and_body().1, "Internal error");
    }

    #[test]
    fn test_username_taken_is_conflict() {
        let (status, _) = ApiError::from(UserError::UsernameTaken).status_and_body();

        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_run_blocking_times_out() {
        let result: Result<(), ApiError> = run_blocking(Duration::from_millis(10), || {
            std::thread::sleep(Duration::from_millis(200));
            Ok::<_, ApiError>(())
        })
        .await;

        assert!(matches!(result, Err(ApiError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_run_blocking_returns_value() {
        let value = run_blocking(Duration::from_secs(5), || Ok::<_, ApiError>(7))
            .await
            .unwrap();

        assert_eq!(value, 7);
    }
}
