//! Storage providers transfer files from an external location into local
//! storage.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{DownloadError, StorageError};
use super::{ProviderTestResult, ValidationResult};

pub mod local;
pub mod object_store;
pub mod s3_client;

pub use local::LocalStorageProvider;
pub use object_store::ObjectStoreProvider;
pub use s3_client::{HttpObjectStoreClient, ObjectStoreClient};

/// A file as listed by a storage provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub name: String,
    /// Provider-relative path passed back to `download_file`.
    pub path: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

impl RemoteFile {
    /// Lower-case extension without the dot.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadOutcome {
    pub size: u64,
    pub downloaded_at: DateTime<Utc>,
}

#[async_trait]
pub trait StorageProvider: Send + Sync {
    fn provider_type(&self) -> &'static str;

    /// Checks the config shape without any I/O.
    fn validate_config(&self, config: &Value) -> ValidationResult;

    /// Applies the config and verifies the backend is reachable.
    async fn connect(&mut self, config: &Value) -> Result<(), StorageError>;

    /// Files under `path`, sorted by path.
    async fn list_files(&self, path: &str) -> Result<Vec<RemoteFile>, StorageError>;

    /// Copies a whole file to `local_path`, creating parent directories.
    async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<DownloadOutcome, DownloadError>;

    /// Reports reachability of a connected provider.
    async fn test_connection(&self) -> ProviderTestResult;

    /// Safe to share one instance across concurrent downloads.
    fn is_reentrant(&self) -> bool {
        false
    }
}
