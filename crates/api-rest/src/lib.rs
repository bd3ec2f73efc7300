//! # API REST
//!
//! HTTP surface of the file hub.
//!
//! Handles:
//! - HTTP endpoints with axum (auth, file upload/list/delete, health)
//! - bearer-token authentication as an extractor ([`AuthUser`])
//! - static serving of stored bytes under `/uploads`
//! - OpenAPI/Swagger documentation
//!
//! Uses `api-shared` for wire types and tokens, and `filehub-core` for everything else.

#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
mod extract;
mod routes;
mod state;

pub use config::RestConfig;
pub use error::ApiError;
pub use extract::AuthUser;
pub use state::AppState;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use filehub_core::constants::UPLOADS_URL_PREFIX;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

/// Allowance for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health,
        routes::auth::register,
        routes::auth::login,
        routes::files::list_files,
        routes::files::upload_file,
        routes::files::delete_file,
    ),
    components(schemas(
        api_shared::HealthRes,
        api_shared::CredentialsReq,
        api_shared::TokenRes,
        api_shared::UserRes,
        api_shared::FileRes,
        routes::files::UploadForm,
    )),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Builds the full application router over `state`.
///
/// CORS is left to the caller so tests can exercise the router without it.
pub fn router(state: AppState) -> Router {
    let max_upload = usize::try_from(state.files.config().max_upload_size()).unwrap_or(usize::MAX);
    let body_limit = max_upload.saturating_add(MULTIPART_OVERHEAD_BYTES);
    let uploads = ServeDir::new(state.files.blob_store().blobs_directory());

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/auth/register", post(routes::auth::register))
        .route("/api/auth/login", post(routes::auth::login))
        .route(
            "/api/files",
            get(routes::files::list_files).post(routes::files::upload_file),
        )
        .route(
            "/api/files/",
            get(routes::files::list_files).post(routes::files::upload_file),
        )
        .route("/api/files/:id", delete(routes::files::delete_file))
        .layer(DefaultBodyLimit::max(body_limit))
        .nest_service(UPLOADS_URL_PREFIX, uploads)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_documents_routes_and_bearer_scheme() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();

        assert!(doc["paths"]["/api/files/{id}"]["delete"].is_object());
        assert!(doc["paths"]["/api/auth/login"]["post"].is_object());
        assert_eq!(
            doc["components"]["securitySchemes"]["bearer_auth"]["scheme"],
            "bearer"
        );
    }

    #[test]
    fn test_upload_failure_description_warns_about_background_completion() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();

        let description = doc["paths"]["/api/files"]["post"]["responses"]["500"]["description"]
            .as_str()
            .unwrap();

        assert!(description.contains("may still complete"));
    }
}
