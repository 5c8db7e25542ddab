use jarvis_shared::ProtocolError;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted document could not be (de)serialized.
    #[error("Document encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// The stored document exists but no longer decodes.
    #[error("Settings document is corrupt: {0}")]
    Corrupt(String),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A client-supplied record was rejected.
    #[error("{0}")]
    Invalid(#[from] ProtocolError),

    /// An update or delete referenced an id that does not exist.
    #[error("No {kind} with id '{id}'")]
    NotFound { kind: &'static str, id: String },

    /// An insert reused an id that already exists.
    #[error("An {kind} with id '{id}' already exists")]
    Duplicate { kind: &'static str, id: String },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
