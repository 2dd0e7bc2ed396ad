//! Application configuration: where the database, image blobs, and backup
//! archives live on disk.
//!
//! Values come from `config.toml` when present, with environment variables
//! (`DECOR_LEDGER_DATABASE_PATH`, `DECOR_LEDGER_DATA_DIR`) taking precedence,
//! and sensible local defaults otherwise.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::{Error, Result};

/// Application identity written into every backup's `meta.json` and checked
/// by the importer before it wipes anything.
pub const APP_NAME: &str = "DecorLedger";

/// Crate version, recorded in backup metadata.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    database_path: Option<String>,
    data_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite database file path.
    pub database_path: String,
    /// Root under which images, backups, and staging directories live.
    pub data_dir: PathBuf,
}

impl AppConfig {
    /// Internal root of the blob store.
    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }

    /// Where finished backup archives are written.
    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }

    /// Scratch directory for export staging; cleared on each run.
    pub fn export_staging_dir(&self) -> PathBuf {
        self.data_dir.join("staging").join("export")
    }

    /// Scratch directory an archive is unpacked into during import.
    pub fn import_staging_dir(&self) -> PathBuf {
        self.data_dir.join("staging").join("import")
    }
}

/// Loads the application configuration.
///
/// Reads `config.toml` from the working directory if it exists, then applies
/// environment overrides. A present-but-malformed config file is a hard
/// error rather than a silent fallback.
pub fn load_app_configuration() -> Result<AppConfig> {
    let file_config = match std::fs::read_to_string(CONFIG_FILE) {
        Ok(raw) => toml::from_str::<FileConfig>(&raw)
            .map_err(|e| Error::Config(format!("Failed to parse {CONFIG_FILE}: {e}")))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No {} found, using defaults and environment.", CONFIG_FILE);
            FileConfig::default()
        }
        Err(e) => {
            return Err(Error::Config(format!("Failed to read {CONFIG_FILE}: {e}")));
        }
    };

    let database_path = std::env::var("DECOR_LEDGER_DATABASE_PATH")
        .ok()
        .or(file_config.database_path)
        .unwrap_or_else(|| "data/decor_ledger.sqlite".to_string());

    let data_dir = std::env::var("DECOR_LEDGER_DATA_DIR")
        .ok()
        .or(file_config.data_dir)
        .map_or_else(|| PathBuf::from("data"), PathBuf::from);

    let config = AppConfig {
        database_path,
        data_dir,
    };
    info!(
        "Configuration resolved: database at '{}', data dir at '{}'",
        config.database_path,
        config.data_dir.display()
    );
    Ok(config)
}

/// Ensures the directories the data core writes into exist.
pub fn ensure_data_dirs(config: &AppConfig) -> Result<()> {
    for dir in [
        config.data_dir.as_path(),
        &config.images_dir(),
        &config.backups_dir(),
    ] {
        create_dir_checked(dir)?;
    }
    if let Some(parent) = Path::new(&config.database_path).parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_checked(parent)?;
        }
    }
    Ok(())
}

fn create_dir_checked(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| Error::Config(format!("Failed to create '{}': {e}", dir.display())))
}
