use api_shared::TokenService;
use filehub_core::{FileService, UserStore};
use std::sync::Arc;

/// Application state for the REST API server
///
/// Every handle is constructed at startup and injected here; handlers never reach for
/// globals.
#[derive(Clone)]
pub struct AppState {
    pub files: Arc<FileService>,
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<TokenService>,
}

impl AppState {
    pub fn new(files: Arc<FileService>, users: Arc<dyn UserStore>, tokens: TokenService) -> Self {
        Self {
            files,
            users,
            tokens: Arc::new(tokens),
        }
    }
}
