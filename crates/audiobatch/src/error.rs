use std::path::PathBuf;
use thiserror::Error;

use crate::providers::error::{MonitorError, NotificationError, ProviderError, StorageError};

#[derive(Error, Debug)]
pub enum AudiobatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Notification config not found: {0}")]
    NotificationNotFound(String),

    #[error("Logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Failed to load batch config from store: {0}")]
    Store(String),
}

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("File record not found: {0}")]
    RecordNotFound(String),

    #[error("Illegal transition for record {record_id}: {from} -> {to}")]
    InvalidTransition {
        record_id: String,
        from: String,
        to: String,
    },

    #[error("File record {0} is already owned by another worker")]
    RecordBusy(String),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("External folder not found: {0}")]
    FolderNotFound(String),

    #[error("External folder '{0}' is not active")]
    FolderInactive(String),

    #[error("Batch job not found: {0}")]
    JobNotFound(String),

    #[error("Folder {folder_id} already has an active batch job ({job_id})")]
    JobAlreadyActive { folder_id: String, job_id: String },

    #[error("Batch job {0} is not active")]
    JobNotActive(String),

    #[error("Batch job {job_id} is {status} and cannot be {action}")]
    InvalidJobState {
        job_id: String,
        status: String,
        action: &'static str,
    },

    #[error("Folder {0} has no files that were not processed before")]
    NoNewFiles(String),

    #[error("Invalid job options: {0}")]
    InvalidOptions(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Scan failed: {0}")]
    Scan(#[from] MonitorError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Failed to prepare download directory '{path}': {source}")]
    DownloadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, AudiobatchError>;
