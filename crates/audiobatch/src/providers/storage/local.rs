//! Local filesystem storage.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Deserialize;
use serde_json::{json, Value};
use walkdir::WalkDir;

use super::{DownloadOutcome, RemoteFile, StorageProvider};
use crate::providers::error::{DownloadError, DownloadErrorKind, StorageError};
use crate::providers::{require_object, ProviderTestResult, ValidationResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalConfig {
    base_path: PathBuf,
    #[serde(default = "default_recursive")]
    recursive: bool,
}

fn default_recursive() -> bool {
    true
}

/// Reads files below a base directory. Holds no per-call state, so one
/// instance serves concurrent downloads.
#[derive(Debug, Default)]
pub struct LocalStorageProvider {
    config: Option<LocalConfig>,
}

impl LocalStorageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn config(&self) -> Result<&LocalConfig, StorageError> {
        self.config.as_ref().ok_or(StorageError::NotConnected)
    }

    /// Joins a provider-relative path onto the base, refusing to leave it.
    fn resolve(base: &Path, relative: &str) -> Option<PathBuf> {
        let relative = Path::new(relative.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return None;
        }
        Some(base.join(relative))
    }

    fn relative_path(base: &Path, path: &Path) -> String {
        let rel = path.strip_prefix(base).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn check_access(base: &Path) -> Result<(), StorageError> {
        let metadata = match std::fs::metadata(base) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::PathNotFound(base.to_path_buf()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(StorageError::PermissionDenied(base.to_path_buf()))
            }
            Err(e) => {
                return Err(StorageError::Io {
                    path: base.to_path_buf(),
                    source: e,
                })
            }
        };
        if !metadata.is_dir() {
            return Err(StorageError::PathNotFound(base.to_path_buf()));
        }
        // Listing is the read check.
        std::fs::read_dir(base).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(base.to_path_buf()),
            _ => StorageError::Io {
                path: base.to_path_buf(),
                source: e,
            },
        })?;
        Ok(())
    }

    /// Creates and removes a scratch file in `base`.
    fn check_writable(base: &Path) -> std::io::Result<()> {
        let scratch = base.join(format!(".audiobatch-write-check-{}", uuid::Uuid::new_v4()));
        std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&scratch)?;
        std::fs::remove_file(&scratch)
    }
}

#[async_trait]
impl StorageProvider for LocalStorageProvider {
    fn provider_type(&self) -> &'static str {
        "local"
    }

    fn validate_config(&self, config: &Value) -> ValidationResult {
        let mut errors = Vec::new();
        if require_object(config, &mut errors) {
            match config.get("basePath") {
                Some(Value::String(s)) if !s.trim().is_empty() => {}
                Some(Value::String(_)) | None => errors.push("basePath is required".to_string()),
                Some(_) => errors.push("basePath must be a string".to_string()),
            }
            if let Some(v) = config.get("recursive") {
                if !v.is_boolean() {
                    errors.push("recursive must be a boolean".to_string());
                }
            }
        }
        ValidationResult::from_errors(errors)
    }

    async fn connect(&mut self, config: &Value) -> Result<(), StorageError> {
        let parsed: LocalConfig = serde_json::from_value(config.clone())
            .map_err(|e| StorageError::InvalidConfig(e.to_string()))?;
        Self::check_access(&parsed.base_path)?;
        info!("Local storage connected at {}", parsed.base_path.display());
        self.config = Some(parsed);
        Ok(())
    }

    async fn list_files(&self, path: &str) -> Result<Vec<RemoteFile>, StorageError> {
        let config = self.config()?;
        let root = Self::resolve(&config.base_path, path)
            .ok_or_else(|| StorageError::PermissionDenied(PathBuf::from(path)))?;
        if !root.is_dir() {
            return Err(StorageError::PathNotFound(root));
        }

        let max_depth = if config.recursive { usize::MAX } else { 1 };
        let mut files = Vec::new();

        for entry in WalkDir::new(&root)
            .min_depth(1)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    debug!("Skipping unreadable entry {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            files.push(RemoteFile {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: Self::relative_path(&config.base_path, entry.path()),
                size: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("Listed {} files under '{}'", files.len(), path);
        Ok(files)
    }

    async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<DownloadOutcome, DownloadError> {
        let config = self.config.as_ref().ok_or_else(|| {
            DownloadError::new(DownloadErrorKind::Connection, remote_path, "provider is not connected")
        })?;
        let source = Self::resolve(&config.base_path, remote_path).ok_or_else(|| {
            DownloadError::new(
                DownloadErrorKind::PermissionDenied,
                remote_path,
                "path escapes the base directory",
            )
        })?;

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::from_io(remote_path, &e))?;
        }

        let size = tokio::fs::copy(&source, local_path)
            .await
            .map_err(|e| DownloadError::from_io(remote_path, &e))?;

        Ok(DownloadOutcome {
            size,
            downloaded_at: Utc::now(),
        })
    }

    async fn test_connection(&self) -> ProviderTestResult {
        let config = match self.config() {
            Ok(c) => c,
            Err(e) => return ProviderTestResult::failure(e.to_string(), Value::Null),
        };
        if let Err(e) = Self::check_access(&config.base_path) {
            return ProviderTestResult::failure(e.to_string(), json!({"basePath": config.base_path}));
        }
        let writable = match Self::check_writable(&config.base_path) {
            Ok(()) => true,
            Err(e) => {
                debug!("Base path {} is not writable: {}", config.base_path.display(), e);
                false
            }
        };
        match self.list_files("").await {
            Ok(files) => ProviderTestResult::success(
                format!("Found {} files", files.len()),
                json!({
                    "basePath": config.base_path,
                    "fileCount": files.len(),
                    "readable": true,
                    "writable": writable,
                }),
            ),
            Err(e) => ProviderTestResult::failure(e.to_string(), json!({"basePath": config.base_path})),
        }
    }

    fn is_reentrant(&self) -> bool {
        true
    }
}
