//! UUID and sharded-locator utilities.
//!
//! The file hub identifies logical uploads and physical blob locations with a *canonical* UUID
//! representation: **32 lowercase hexadecimal characters** (no hyphens).
//!
//! This crate provides:
//! - A small wrapper type ([`UuidService`]) that *guarantees* the canonical format once
//!   constructed.
//! - Sharding logic that derives a relative storage locator from an identifier.
//!
//! ## Canonical UUID form
//! - Length: 32
//! - Characters: `0-9` and `a-f` only
//! - Example: `550e8400e29b41d4a716446655440000`
//!
//! Canonical form is *required* for externally supplied identifiers (for example, a record id in
//! a request path). Use [`UuidService::parse`] to validate an input string.
//!
//! ## Sharded locator layout
//! For a canonical UUID `u` and an optional extension `ext`, blobs live at:
//! `<u[0..2]>/<u[2..4]>/<u>.<ext>`
//!
//! Example:
//! `55/0e/550e8400e29b41d4a716446655440000.pdf`
//!
//! This scheme prevents very large fan-out in a single directory.

mod service;

pub use service::UuidService;

/// Error type for UUID operations.
#[derive(Debug, thiserror::Error)]
pub enum UuidError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for UUID operations.
pub type UuidResult<T> = Result<T, UuidError>;
