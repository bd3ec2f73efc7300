use crate::metadata::MetadataError;
use filehub_files::FilesError;

/// Startup configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("invalid value for {key} ({value:?}): {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Failure classes surfaced to callers of the file service.
///
/// Outer layers map these onto their own status codes; the class, not the variant, decides
/// what a client is told.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input shape, oversized payload or missing field
    Validation,
    /// Missing or invalid identity
    Auth,
    /// Unknown record
    NotFound,
    /// Storage unavailable or failing; details must not reach the client
    Io,
}

#[derive(Debug, thiserror::Error)]
pub enum FileServiceError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("payload of {size} bytes exceeds the maximum of {max} bytes")]
    PayloadTooLarge { size: u64, max: u64 },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("failed to read upload: {0}")]
    Source(#[from] std::io::Error),
    #[error("blob storage error: {0}")]
    Storage(#[from] FilesError),
    #[error("metadata store error: {0}")]
    Metadata(#[from] MetadataError),
}

impl FileServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FileServiceError::Unauthenticated => ErrorKind::Auth,
            FileServiceError::PayloadTooLarge { .. } | FileServiceError::InvalidInput(_) => {
                ErrorKind::Validation
            }
            FileServiceError::NotFound(_) => ErrorKind::NotFound,
            FileServiceError::Source(_)
            | FileServiceError::Storage(_)
            | FileServiceError::Metadata(_) => ErrorKind::Io,
        }
    }
}

pub type FileServiceResult<T> = std::result::Result<T, FileServiceError>;
