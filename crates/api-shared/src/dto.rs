//! Wire types shared by the REST handlers and the OpenAPI document.

use chrono::{DateTime, Utc};
use filehub_core::{FileRecord, User};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// Body of both the register and login requests.
#[derive(Clone, Deserialize, Serialize, ToSchema)]
pub struct CredentialsReq {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for CredentialsReq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsReq")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TokenRes {
    pub token: String,
}

/// A registered user, without the password verifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UserRes {
    pub id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserRes {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            username: user.username.to_string(),
            created_at: user.created_at,
        }
    }
}

/// A stored upload as returned by the file endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FileRes {
    pub id: String,
    /// Public path of the bytes, e.g. `/uploads/55/0e/550e….pdf`
    pub file: String,
    pub original_filename: String,
    pub file_type: String,
    pub size: u64,
    /// Hex SHA-256 of the content
    pub hash: String,
    pub uploaded_at: DateTime<Utc>,
}

impl From<&FileRecord> for FileRes {
    fn from(record: &FileRecord) -> Self {
        Self {
            id: record.id.to_string(),
            file: record.public_path(),
            original_filename: record.original_filename.to_string(),
            file_type: record.file_type.clone(),
            size: record.size,
            hash: record.hash.to_string(),
            uploaded_at: record.uploaded_at,
        }
    }
}

/// Query parameters accepted by the listing endpoint.
///
/// Documentation only: handlers read the raw pairs so that malformed values are ignored
/// instead of rejecting the request.
#[derive(Clone, Debug, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FileQuery {
    /// Case-insensitive substring of the original filename
    pub search: Option<String>,
    /// Case-insensitive substring of the content type
    pub file_type: Option<String>,
    /// Minimum size in bytes, inclusive
    pub size_min: Option<u64>,
    /// Maximum size in bytes, inclusive
    pub size_max: Option<u64>,
    /// `YYYY-MM-DD`; uploaded on or after this day
    pub uploaded_after: Option<String>,
    /// `YYYY-MM-DD`; uploaded on or before this day
    pub uploaded_before: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use filehub_files::{digest_bytes, BlobLocation};
    use filehub_types::NonEmptyText;
    use filehub_uuid::UuidService;

    #[test]
    fn test_credentials_debug_hides_password() {
        let req = CredentialsReq {
            username: "alice".into(),
            password: "hunter22hunter22".into(),
        };

        assert!(!format!("{:?}", req).contains("hunter22"));
    }

    #[test]
    fn test_user_res_has_no_password_field() {
        let user = User::new(NonEmptyText::new("alice").unwrap(), "$argon2id$secret".into());

        let json = serde_json::to_value(UserRes::from(&user)).unwrap();

        assert_eq!(json["username"], "alice");
        assert!(json.get("password_hash").is_none());
        assert!(!json.to_string().contains("argon2id"));
    }

    #[test]
    fn test_file_res_shape() {
        let record = FileRecord {
            id: UuidService::parse("550e8400e29b41d4a716446655440000").unwrap(),
            location: BlobLocation::parse("55/0e/550e8400e29b41d4a716446655440000.pdf").unwrap(),
            original_filename: NonEmptyText::new("report.pdf").unwrap(),
            file_type: "application/pdf".into(),
            size: 2048,
            hash: digest_bytes(b"report"),
            uploaded_at: Utc.with_ymd_and_hms(2024, 3, 2, 10, 30, 0).unwrap(),
        };

        let json = serde_json::to_value(FileRes::from(&record)).unwrap();

        assert_eq!(json["id"], "550e8400e29b41d4a716446655440000");
        assert_eq!(
            json["file"],
            "/uploads/55/0e/550e8400e29b41d4a716446655440000.pdf"
        );
        assert_eq!(json["original_filename"], "report.pdf");
        assert_eq!(json["size"], 2048);
        assert_eq!(json["hash"], digest_bytes(b"report").as_str());
        assert_eq!(json["uploaded_at"], "2024-03-02T10:30:00Z");
    }
}
