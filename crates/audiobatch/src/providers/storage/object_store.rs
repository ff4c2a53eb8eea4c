//! S3-compatible object store storage.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use serde::Deserialize;
use serde_json::{json, Value};

use super::s3_client::{
    HttpObjectStoreClient, ListObjectsRequest, ObjectStoreClient, ObjectStoreSettings,
};
use super::{DownloadOutcome, RemoteFile, StorageProvider};
use crate::providers::error::{DownloadError, DownloadErrorKind, StorageError};
use crate::providers::{config_str, require_object, ProviderTestResult, ValidationResult};
use crate::secrets::{has_config_secret, resolve_config_secret};

const MAX_KEYS_LIMIT: u32 = 1000;

/// Builds the client for a connected provider. Replaced in tests to observe
/// whether a client was ever created.
pub type ClientFactory =
    Arc<dyn Fn(ObjectStoreSettings) -> Result<Arc<dyn ObjectStoreClient>, StorageError> + Send + Sync>;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectStoreConfig {
    bucket: String,
    region: String,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    prefix: Option<String>,
    #[serde(default)]
    delimiter: Option<String>,
    #[serde(default = "default_max_keys")]
    max_keys: u32,
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
}

fn default_max_keys() -> u32 {
    MAX_KEYS_LIMIT
}

fn default_timeout_seconds() -> u64 {
    300
}

impl ObjectStoreConfig {
    /// The configured prefix as a bare folder path, without surrounding slashes.
    fn base_prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or("").trim_matches('/')
    }

    fn object_key(&self, relative: &str) -> String {
        join_key(self.base_prefix(), relative.trim_start_matches('/'))
    }
}

fn join_key(prefix: &str, rest: &str) -> String {
    match (prefix.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{}/{}", prefix, rest),
    }
}

struct Connected {
    config: ObjectStoreConfig,
    client: Arc<dyn ObjectStoreClient>,
}

/// Lists and downloads objects from one bucket. Each call is an independent
/// request, so one instance serves concurrent downloads.
pub struct ObjectStoreProvider {
    factory: ClientFactory,
    state: Option<Connected>,
}

impl Default for ObjectStoreProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStoreProvider {
    pub fn new() -> Self {
        Self::with_client_factory(Arc::new(
            |settings: ObjectStoreSettings| -> Result<Arc<dyn ObjectStoreClient>, StorageError> {
                Ok(Arc::new(HttpObjectStoreClient::new(settings)?))
            },
        ))
    }

    pub fn with_client_factory(factory: ClientFactory) -> Self {
        Self { factory, state: None }
    }

    fn connected(&self) -> Result<&Connected, StorageError> {
        self.state.as_ref().ok_or(StorageError::NotConnected)
    }

    fn list_request(config: &ObjectStoreConfig, path: &str) -> ListObjectsRequest {
        let mut prefix = config.object_key(path);
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        ListObjectsRequest {
            prefix: (!prefix.is_empty()).then_some(prefix),
            delimiter: config.delimiter.clone().filter(|d| !d.is_empty()),
            max_keys: config.max_keys,
            continuation_token: None,
        }
    }
}

fn valid_bucket_name(name: &str) -> bool {
    let len_ok = (3..=63).contains(&name.len());
    let chars_ok = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    let edges_ok = name
        .chars()
        .next()
        .zip(name.chars().last())
        .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());
    len_ok && chars_ok && edges_ok
}

#[async_trait]
impl StorageProvider for ObjectStoreProvider {
    fn provider_type(&self) -> &'static str {
        "s3"
    }

    fn validate_config(&self, config: &Value) -> ValidationResult {
        let mut errors = Vec::new();
        if !require_object(config, &mut errors) {
            return ValidationResult::from_errors(errors);
        }

        match config_str(config, "bucket") {
            Some(bucket) if valid_bucket_name(bucket) => {}
            Some(bucket) => errors.push(format!("bucket '{}' is not a valid bucket name", bucket)),
            None => errors.push("bucket is required".to_string()),
        }
        match config_str(config, "region") {
            Some(region) if !region.trim().is_empty() => {}
            _ => errors.push("region is required".to_string()),
        }
        if let Some(endpoint) = config.get("endpoint") {
            match endpoint.as_str().map(reqwest::Url::parse) {
                Some(Ok(url)) if matches!(url.scheme(), "http" | "https") => {}
                _ => errors.push("endpoint must be an http(s) URL".to_string()),
            }
        }
        for key in ["prefix", "delimiter"] {
            if config.get(key).is_some_and(|v| !v.is_string()) {
                errors.push(format!("{} must be a string", key));
            }
        }
        if let Some(v) = config.get("maxKeys") {
            match v.as_u64() {
                Some(n) if (1..=MAX_KEYS_LIMIT as u64).contains(&n) => {}
                _ => errors.push(format!("maxKeys must be between 1 and {}", MAX_KEYS_LIMIT)),
            }
        }
        if let Some(v) = config.get("timeoutSeconds") {
            if !v.as_u64().is_some_and(|n| n > 0) {
                errors.push("timeoutSeconds must be a positive integer".to_string());
            }
        }
        if ["accessTokenFile", "accessTokenEnv"]
            .iter()
            .any(|k| config.get(*k).is_some_and(|v| !v.is_string()))
        {
            errors.push("accessToken sources must be strings".to_string());
        }

        ValidationResult::from_errors(errors)
    }

    async fn connect(&mut self, config: &Value) -> Result<(), StorageError> {
        let validation = self.validate_config(config);
        if !validation.valid {
            return Err(StorageError::InvalidConfig(validation.errors.join("; ")));
        }
        let parsed: ObjectStoreConfig = serde_json::from_value(config.clone())
            .map_err(|e| StorageError::InvalidConfig(e.to_string()))?;
        let access_token = if has_config_secret(config, "accessToken") {
            resolve_config_secret(config, "accessToken")
                .map_err(|e| StorageError::InvalidConfig(e.to_string()))?
        } else {
            None
        };

        let client = (self.factory)(ObjectStoreSettings {
            bucket: parsed.bucket.clone(),
            region: parsed.region.clone(),
            endpoint: parsed.endpoint.clone(),
            access_token,
            timeout: Duration::from_secs(parsed.timeout_seconds),
        })?;

        // A one-key listing checks reachability.
        let mut reachability = Self::list_request(&parsed, "");
        reachability.max_keys = 1;
        client.list_objects(&reachability).await?;

        info!("Object store connected to bucket '{}' ({})", parsed.bucket, parsed.region);
        self.state = Some(Connected { config: parsed, client });
        Ok(())
    }

    async fn list_files(&self, path: &str) -> Result<Vec<RemoteFile>, StorageError> {
        let Connected { config, client } = self.connected()?;
        let mut request = Self::list_request(config, path);
        let base = config.base_prefix();
        let mut files = Vec::new();
        let mut pages = 0usize;

        loop {
            let page = client.list_objects(&request).await?;
            pages += 1;
            for object in page.objects {
                // Zero-byte "folder" placeholders.
                if object.key.ends_with('/') {
                    continue;
                }
                let relative = object
                    .key
                    .strip_prefix(base)
                    .unwrap_or(&object.key)
                    .trim_start_matches('/')
                    .to_string();
                let name = relative.rsplit('/').next().unwrap_or(&relative).to_string();
                files.push(RemoteFile {
                    name,
                    path: relative,
                    size: object.size,
                    modified: object.last_modified,
                });
            }
            match page.next_continuation_token {
                Some(token) if !token.is_empty() => request.continuation_token = Some(token),
                _ => break,
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("Listed {} objects in {} page(s) under '{}'", files.len(), pages, path);
        Ok(files)
    }

    async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<DownloadOutcome, DownloadError> {
        let Connected { config, client } = self.state.as_ref().ok_or_else(|| {
            DownloadError::new(DownloadErrorKind::Connection, remote_path, "provider is not connected")
        })?;

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::from_io(remote_path, &e))?;
        }

        let key = config.object_key(remote_path);
        let size = client.get_object(&key, local_path).await?;

        Ok(DownloadOutcome {
            size,
            downloaded_at: Utc::now(),
        })
    }

    async fn test_connection(&self) -> ProviderTestResult {
        let Connected { config, client } = match self.connected() {
            Ok(c) => c,
            Err(e) => return ProviderTestResult::failure(e.to_string(), Value::Null),
        };
        let details = json!({
            "bucket": config.bucket,
            "region": config.region,
            "prefix": config.base_prefix(),
        });
        match client.list_objects(&Self::list_request(config, "")).await {
            Ok(page) => {
                let mut details = details;
                details["objectCount"] = json!(page.objects.len());
                details["truncated"] = json!(page.next_continuation_token.is_some());
                ProviderTestResult::success(
                    format!("Bucket '{}' is reachable", config.bucket),
                    details,
                )
            }
            Err(e) => ProviderTestResult::failure(e.to_string(), details),
        }
    }

    fn is_reentrant(&self) -> bool {
        true
    }
}
