use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Cannot prepare store directory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema migration {version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// A JSON column could not be encoded or decoded.
    #[error("Column '{column}' holds invalid JSON: {source}")]
    Json {
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A status, error code or cause written by a newer build.
    #[error("Unknown {kind} '{value}' in store")]
    UnknownValue { kind: &'static str, value: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}
