use std::path::Path;

use decor_ledger::blobs::BlobStore;
use decor_ledger::errors::{Error, Result};
use decor_ledger::{config, db, services};
use dotenvy::dotenv;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// Single-threaded event loop: data-layer operations interleave only at
// await points.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file (non-fatal, env vars can be set externally)
    dotenv().ok();

    // 3. Resolve configuration and make sure the data directories exist
    let app_config = config::load_app_configuration()?;
    config::ensure_data_dirs(&app_config)?;

    // 4. Initialize the relational store (fatal on schema failure)
    let pool = db::init_db(&app_config.database_path)
        .await
        .inspect(|_| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to initialize database: {}", e))?;

    // 5. Initialize the blob store and reclaim anything a crash stranded
    let blobs = BlobStore::new(app_config.images_dir());
    blobs.init().await?;
    match services::collect_orphans(&pool, &blobs).await {
        Ok(deleted) if deleted > 0 => info!("Startup GC reclaimed {} blob(s).", deleted),
        Ok(_) => {}
        Err(e) => warn!("Startup garbage collection failed: {}", e),
    }

    // 6. Dispatch the requested operation
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("export") => {
            let archive = services::export_backup(&pool, &blobs, &app_config).await?;
            info!("Backup ready to share: {}", archive.display());
        }
        Some("import") => {
            let file = args.get(2).ok_or_else(|| {
                Error::Config("Usage: decor-ledger import <backup.tar.gz>".to_string())
            })?;
            match services::import_backup(&pool, &blobs, &app_config, Path::new(file)).await {
                Ok(()) => info!("Backup restored."),
                Err(e @ Error::PartialRestore(_)) => {
                    error!("{e}. Data may be inconsistent - restart the app.");
                    return Err(e);
                }
                Err(e) => {
                    error!("Invalid or corrupted backup file: {e}");
                    return Err(e);
                }
            }
        }
        Some("gc") => {
            let deleted = services::collect_orphans(&pool, &blobs).await?;
            info!("Garbage collection removed {} orphaned blob(s).", deleted);
        }
        Some(other) => {
            return Err(Error::Config(format!(
                "Unknown command '{other}'. Expected: export | import <file> | gc"
            )));
        }
        None => info!("Data core ready (database + blob store initialized)."),
    }

    Ok(())
}
