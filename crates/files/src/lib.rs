//! File hub blob storage
//!
//! This crate owns the physical bytes of every upload. It knows nothing about logical
//! uploads, users or filenames; callers hand it a content digest and a byte source and get
//! back an opaque locator.
//!
//! ## Design Principles
//!
//! - Exactly one blob exists per SHA-256 digest
//! - Blob bytes are immutable once committed
//! - Writes are all-or-nothing: bytes land in `tmp/`, are renamed into `blobs/`, and only become
//!   visible once the digest pointer in `index/` is committed
//! - Reclaiming a blob performs no reference counting; the caller decides when it is safe
//! - One open store per root: [`BlobStore::open`] takes an exclusive lock on the root and a
//!   second open fails with [`FilesError::StoreLocked`] until the first store is dropped
//!
//! ## Storage Layout
//!
//! ```text
//! <upload_dir>/
//! ├── blobs/            # served publicly as /uploads/<locator>
//! │   └── 55/0e/550e8400e29b41d4a716446655440000.pdf
//! ├── index/
//! │   └── sha256/
//! │       └── ab/cd/abcd…   # contains the locator of the blob with this digest
//! ├── tmp/              # in-flight writes
//! └── filehub.lock      # held by the open store
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use filehub_files::{digest_and_rewind, BlobStore};
//! use std::io::Cursor;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = BlobStore::open(Path::new("uploads"))?;
//! let mut source = Cursor::new(b"hello".to_vec());
//! let digest = digest_and_rewind(&mut source)?;
//! let outcome = store.put(&digest, &mut source, 5, Some("txt"))?;
//! println!("stored at {}", outcome.location());
//! # Ok(())
//! # }
//! ```

mod blob_store;
mod constants;
mod hasher;
mod store_lock;

pub use blob_store::{extension_of, BlobLocation, BlobStore, PutOutcome, ReclaimOutcome, SweepReport};
pub use constants::{
    BLOBS_FOLDER_NAME, HASH_ALGORITHM, INDEX_FOLDER_NAME, LOCK_FILE_NAME, TMP_FOLDER_NAME,
};
pub use hasher::{digest_and_rewind, digest_bytes, Sha256Hash};

/// Errors that can occur during blob storage operations
#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    /// Storage root could not be created or is not a directory
    #[error("Invalid root directory: {0}")]
    InvalidRootDirectory(String),

    /// Locator failed validation (potential directory traversal or unsafe path)
    #[error("Invalid blob location: {0}")]
    InvalidLocation(String),

    /// Digest string is not 64 lowercase hex characters
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    /// Source yielded a different number of bytes than declared
    #[error("Size mismatch: expected {expected} bytes, read {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Source bytes do not hash to the digest the caller supplied
    #[error("Digest mismatch: expected {expected}, computed {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// Another open store already owns this root
    #[error("Store {path} is in use by another process (pid {pid:?})")]
    StoreLocked { pid: Option<u32>, path: String },

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type FilesResult<T> = Result<T, FilesError>;
