use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    /// Schema setup failed at startup. Fatal: the rest of the system cannot
    /// operate on a partially-initialized schema.
    #[error("Schema initialization error: {0}")]
    Schema(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The selected file is not a recognizable backup archive. Raised before
    /// any destructive step, so the live data is untouched.
    #[error("Invalid backup archive: {0}")]
    InvalidArchive(String),

    /// A restore failed after the live store had already been wiped. The
    /// store may be partially populated; the user should restart the app.
    #[error("Restore failed after wipe, data may be inconsistent: {0}")]
    PartialRestore(String),

    #[error("Invalid payload: {0}")]
    Payload(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("Rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
}

// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
