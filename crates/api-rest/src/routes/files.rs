use crate::error::{run_blocking, ApiError};
use crate::extract::AuthUser;
use crate::AppState;
use api_shared::{FileQuery, FileRes};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use filehub_core::{FileFilter, FileRecord};
use filehub_uuid::UuidService;
use std::io::{Seek, SeekFrom};
use tokio::io::AsyncWriteExt;

/// Multipart field carrying the upload.
pub const UPLOAD_FIELD: &str = "file";

/// Multipart form accepted by the upload endpoint.
#[derive(utoipa::ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

#[utoipa::path(
    get,
    path = "/api/files",
    params(FileQuery),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Matching files, newest first", body = [FileRes]),
        (status = 401, description = "Missing or invalid token"),
        (status = 500, description = "Internal server error")
    )
)]
/// List uploaded files
///
/// Filters combine with AND. Unparsable filter values are ignored rather than rejected.
#[axum::debug_handler]
pub async fn list_files(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Vec<FileRes>>, ApiError> {
    let filter = FileFilter::from_query_pairs(pairs);
    let files = state.files.clone();
    let timeout = files.config().operation_timeout();

    let records = run_blocking(timeout, move || files.list(&filter, Some(&identity))).await?;

    Ok(Json(records.iter().map(FileRes::from).collect()))
}

#[utoipa::path(
    post,
    path = "/api/files",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    security(("bearer_auth" = [])),
    responses(
        (status = 201, description = "File stored", body = FileRes),
        (status = 400, description = "Missing file field or invalid upload"),
        (status = 401, description = "Missing or invalid token"),
        (status = 413, description = "File too large"),
        (status = 500, description = "Internal server error. After a timeout the upload may still complete in the background; list the files before retrying")
    )
)]
/// Upload a file
///
/// The `file` field is spooled to an anonymous temporary file while its size is checked, then
/// hashed and stored. Identical content is stored once no matter how often it is uploaded.
///
/// A timed-out store operation is answered with 500 but keeps running, so the file can still
/// appear in the listing afterwards.
#[axum::debug_handler]
pub async fn upload_file(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<FileRes>), ApiError> {
    let max = state.files.config().max_upload_size();

    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();

        let spool = tempfile::tempfile().map_err(|e| ApiError::Internal(e.to_string()))?;
        let mut spool = tokio::fs::File::from_std(spool);
        let mut size: u64 = 0;
        while let Some(chunk) = field.chunk().await? {
            size += chunk.len() as u64;
            if size > max {
                tracing::debug!(size, max, "upload rejected while streaming");
                return Err(ApiError::PayloadTooLarge);
            }
            spool
                .write_all(&chunk)
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))?;
        }
        spool
            .flush()
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        let mut spool = spool.into_std().await;

        let files = state.files.clone();
        let timeout = files.config().operation_timeout();
        let record = run_blocking(timeout, move || -> Result<FileRecord, ApiError> {
            spool
                .seek(SeekFrom::Start(0))
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            Ok(files.upload(&mut spool, &filename, &content_type, size, Some(&identity))?)
        })
        .await?;

        return Ok((StatusCode::CREATED, Json(FileRes::from(&record))));
    }

    Err(ApiError::BadRequest("No file uploaded"))
}

#[utoipa::path(
    delete,
    path = "/api/files/{id}",
    params(("id" = String, Path, description = "File id, 32 lowercase hex characters")),
    security(("bearer_auth" = [])),
    responses(
        (status = 204, description = "File deleted"),
        (status = 400, description = "Malformed file id"),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "File not found"),
        (status = 500, description = "Internal server error")
    )
)]
/// Delete a file
///
/// The stored bytes are removed only when no other upload shares the same content.
#[axum::debug_handler]
pub async fn delete_file(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = UuidService::parse(&id).map_err(|_| ApiError::BadRequest("Invalid file id"))?;
    let files = state.files.clone();
    let timeout = files.config().operation_timeout();

    run_blocking(timeout, move || files.delete(&id, Some(&identity))).await?;

    Ok(StatusCode::NO_CONTENT)
}
