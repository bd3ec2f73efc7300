//! Defaults applied when a configuration value is not supplied.

use std::time::Duration;

pub const DEFAULT_UPLOAD_DIR: &str = "uploads";
pub const DEFAULT_DATABASE_PATH: &str = "filehub.db";

pub const DEFAULT_MAX_UPLOAD_SIZE_MB: u64 = 10;
pub const BYTES_PER_MB: u64 = 1024 * 1024;

pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Unreferenced files younger than this are never swept.
pub const DEFAULT_ORPHAN_GRACE: Duration = Duration::from_secs(60 * 60);

/// Longest original filename accepted on upload, in characters.
pub const MAX_FILENAME_CHARS: usize = 255;

/// Public URL prefix under which blob locators are served.
pub const UPLOADS_URL_PREFIX: &str = "/uploads";
