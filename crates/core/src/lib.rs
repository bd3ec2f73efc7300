//! # File Hub Core
//!
//! Core business logic for the file hub:
//! - logical upload records and their filtered listing ([`metadata`])
//! - the [`FileService`] orchestrating uploads and reference-counted deletes over the blob
//!   store in `filehub_files`
//! - registered users for the authentication gate ([`users`])
//! - startup configuration ([`CoreConfig`])
//!
//! **No API concerns**: HTTP servers, token issuance and password hashing belong in
//! `api-rest` or `api-shared`. Identity arrives here as an explicit [`Identity`] parameter.

pub mod config;
pub mod constants;
mod error;
mod identity;
pub mod locks;
pub mod metadata;
pub mod service;
pub mod users;

pub use config::CoreConfig;
pub use error::{
    ConfigError, ConfigResult, ErrorKind, FileServiceError, FileServiceResult,
};
pub use identity::Identity;
pub use metadata::{
    FileFilter, FileRecord, InMemoryMetadataStore, MetadataError, MetadataStore,
    SqliteMetadataStore,
};
pub use service::{FileService, ReconcileReport};
pub use users::{InMemoryUserStore, SqliteUserStore, User, UserError, UserStore};
