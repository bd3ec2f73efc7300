use filehub_types::NonEmptyText;
use filehub_uuid::UuidService;

/// Verified caller identity, produced by the authentication gate.
///
/// File service operations take it as an explicit parameter so that every entry point
/// states its authorisation requirement in its signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UuidService,
    pub username: NonEmptyText,
}

impl Identity {
    pub fn new(user_id: UuidService, username: NonEmptyText) -> Self {
        Self { user_id, username }
    }
}
