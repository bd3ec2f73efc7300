//! Directory names and limits for the blob store layout.

/// Directory (under the storage root) holding committed blob bytes.
pub const BLOBS_FOLDER_NAME: &str = "blobs";

/// Directory (under the storage root) holding digest pointers.
pub const INDEX_FOLDER_NAME: &str = "index";

/// Directory (under the storage root) holding in-flight writes.
pub const TMP_FOLDER_NAME: &str = "tmp";

/// Lock file (under the storage root) held by the process that has the store open.
pub const LOCK_FILE_NAME: &str = "filehub.lock";

/// Hashing algorithm used for content addressing.
pub const HASH_ALGORITHM: &str = "sha256";

/// Read buffer used when streaming a source into the hasher or a temp file.
pub(crate) const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Longest file extension kept on a blob locator.
pub(crate) const MAX_EXTENSION_LEN: usize = 16;
