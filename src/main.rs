use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{AppState, RestConfig};
use api_shared::TokenService;
use filehub_core::{CoreConfig, FileService, SqliteMetadataStore, SqliteUserStore};
use filehub_files::BlobStore;

/// Main entry point for the file hub
///
/// Resolves configuration, opens the blob store and the SQLite database, then serves the REST
/// API and runs the periodic reconciliation pass until the process is stopped.
///
/// # Environment Variables
/// - `SERVER_ADDR`: REST server address (default: "0.0.0.0:8000")
/// - `UPLOAD_DIR`: Blob store root (default: "uploads")
/// - `DATABASE_PATH`: SQLite database file (default: "filehub.db")
/// - `MAX_UPLOAD_SIZE_MB`: Largest accepted upload (default: 10)
/// - `JWT_SECRET`: Token signing secret, at least 32 bytes (required)
/// - `JWT_EXPIRES_IN_HOURS`: Token lifetime (default: 24)
/// - `ALLOWED_ORIGINS`: Comma-separated CORS origins (default: "http://localhost:3000")
/// - `RECONCILE_INTERVAL_SECS`: Reconciliation period, 0 disables (default: 3600)
///
/// # Errors
/// Returns an error if configuration is invalid, storage cannot be opened, the address cannot
/// be bound, or the server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("filehub=info".parse()?)
                .add_directive("api_rest=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let core_cfg = CoreConfig::from_env()?;
    let rest_cfg = RestConfig::from_env()?;
    tracing::debug!(?core_cfg, ?rest_cfg, "configuration resolved");

    // Held until exit; a concurrent `filehub reconcile` is refused while it is.
    let blobs = Arc::new(BlobStore::open(core_cfg.upload_dir())?);
    let metadata = Arc::new(SqliteMetadataStore::open(core_cfg.database_path())?);
    let users = Arc::new(SqliteUserStore::open(core_cfg.database_path())?);
    let tokens = TokenService::new(rest_cfg.jwt_secret.clone(), rest_cfg.jwt_expiry)?;

    let orphan_grace = core_cfg.orphan_grace();
    let files = Arc::new(FileService::new(blobs, metadata, core_cfg));

    if let Some(interval) = rest_cfg.reconcile_interval {
        tokio::spawn(reconcile_loop(files.clone(), interval, orphan_grace));
    }

    let app = api_rest::router(AppState::new(files, users, tokens)).layer(rest_cfg.cors_layer()?);

    tracing::info!("++ Starting file hub REST on {}", rest_cfg.server_addr);

    let listener = tokio::net::TcpListener::bind(&rest_cfg.server_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("-- File hub stopped");
    Ok(())
}

/// Runs [`FileService::reconcile`] every `interval` on the blocking pool.
async fn reconcile_loop(files: Arc<FileService>, interval: Duration, grace: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // First tick fires immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let files = files.clone();
        match tokio::task::spawn_blocking(move || files.reconcile(grace)).await {
            Ok(Ok(report)) => tracing::info!(
                orphans_reclaimed = report.orphans_reclaimed,
                stray_files_removed = report.stray_files_removed,
                dangling_records = report.dangling_records,
                "reconciliation pass finished"
            ),
            Ok(Err(e)) => tracing::error!(error = %e, "reconciliation pass failed"),
            Err(e) => tracing::error!(error = %e, "reconciliation task panicked"),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
