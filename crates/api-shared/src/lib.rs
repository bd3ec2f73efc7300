//! # API Shared
//!
//! Definitions shared by the file hub's outer surfaces.
//!
//! Contains:
//! - Wire DTOs with serde and OpenAPI schemas (`dto` module)
//! - The authentication gate: password verifiers and bearer tokens (`auth` module)
//! - `HealthService`
//!
//! Used by `api-rest` and the `filehub-run` binary.

pub mod auth;
pub mod dto;
pub mod health;

pub use auth::{AuthError, AuthResult, Claims, TokenService};
pub use dto::*;
pub use health::HealthService;
