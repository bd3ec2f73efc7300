use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use filehub_core::{CoreConfig, FileFilter, FileService, MetadataStore, SqliteMetadataStore};
use filehub_files::BlobStore;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "filehub")]
#[command(about = "File hub maintenance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored files, newest first
    List {
        /// Case-insensitive substring of the original filename
        #[arg(long)]
        search: Option<String>,
        /// Case-insensitive substring of the content type
        #[arg(long)]
        file_type: Option<String>,
        /// Minimum size in bytes
        #[arg(long)]
        size_min: Option<u64>,
        /// Maximum size in bytes
        #[arg(long)]
        size_max: Option<u64>,
        /// Uploaded on or after this day (YYYY-MM-DD)
        #[arg(long)]
        uploaded_after: Option<NaiveDate>,
        /// Uploaded on or before this day (YYYY-MM-DD)
        #[arg(long)]
        uploaded_before: Option<NaiveDate>,
    },
    /// Reclaim orphaned blobs and report records whose bytes are missing
    ///
    /// Refuses to run while a server has the upload directory open; the server runs the same
    /// pass periodically (RECONCILE_INTERVAL_SECS).
    Reconcile {
        /// Minimum age in seconds before unindexed files are swept (default: ORPHAN_GRACE_SECS)
        #[arg(long)]
        grace_secs: Option<u64>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("filehub=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = CoreConfig::from_env()?;

    match cli.command {
        Some(Commands::List {
            search,
            file_type,
            size_min,
            size_max,
            uploaded_after,
            uploaded_before,
        }) => {
            let filter = FileFilter {
                search,
                file_type,
                size_min,
                size_max,
                uploaded_after,
                uploaded_before,
            };
            let metadata = SqliteMetadataStore::open(cfg.database_path())?;
            let records = metadata.query(&filter)?;
            if records.is_empty() {
                println!("No files found.");
            } else {
                for record in records {
                    println!(
                        "ID: {}, Name: {}, Type: {}, Size: {}, Uploaded: {}, Path: {}",
                        record.id,
                        record.original_filename,
                        record.file_type,
                        record.size,
                        record.uploaded_at,
                        record.public_path()
                    );
                }
            }
        }
        Some(Commands::Reconcile { grace_secs }) => {
            let grace = grace_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| cfg.orphan_grace());
            if grace <= cfg.operation_timeout() {
                return Err(format!(
                    "grace must exceed the operation timeout of {}s",
                    cfg.operation_timeout().as_secs()
                )
                .into());
            }

            // Fails with StoreLocked while the server holds the upload directory.
            let blobs = Arc::new(BlobStore::open(cfg.upload_dir())?);
            let metadata = Arc::new(SqliteMetadataStore::open(cfg.database_path())?);
            let service = FileService::new(blobs, metadata, cfg);

            let report = service.reconcile(grace)?;
            println!(
                "Orphans reclaimed: {}, stray files removed: {}, dangling records: {}",
                report.orphans_reclaimed, report.stray_files_removed, report.dangling_records
            );
        }
        None => {
            println!("Use 'filehub --help' for commands");
        }
    }

    Ok(())
}
