//! External folder profiles: one storage provider, one monitor provider and
//! the admission rules applied to whatever the monitor discovers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A provider selection: registry type key plus its opaque configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: String,
    #[serde(default = "empty_object")]
    pub config: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl ProviderConfig {
    pub fn new(provider_type: impl Into<String>, config: Value) -> Self {
        Self {
            provider_type: provider_type.into(),
            config,
        }
    }
}

/// Admission rules and auto-start flag for a folder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingConfig {
    /// Files larger than this many bytes are skipped. `None` admits any size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<u64>,
    /// Lower-case extensions without the dot. Empty admits every extension.
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
    #[serde(default)]
    pub auto_start: bool,
}

/// A named, activatable folder profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalFolderConfig {
    pub id: String,
    pub name: String,
    pub storage_config: ProviderConfig,
    pub monitor_config: ProviderConfig,
    #[serde(default)]
    pub processing_config: ProcessingConfig,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a folder profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFolder {
    pub name: String,
    pub storage_config: ProviderConfig,
    pub monitor_config: ProviderConfig,
    #[serde(default)]
    pub processing_config: ProcessingConfig,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl NewFolder {
    pub fn into_config(self) -> ExternalFolderConfig {
        let now = Utc::now();
        ExternalFolderConfig {
            id: uuid::Uuid::new_v4().to_string(),
            name: self.name,
            storage_config: self.storage_config,
            monitor_config: self.monitor_config,
            processing_config: self.processing_config,
            is_active: self.is_active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update for a folder profile. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderUpdate {
    pub name: Option<String>,
    pub storage_config: Option<ProviderConfig>,
    pub monitor_config: Option<ProviderConfig>,
    pub processing_config: Option<ProcessingConfig>,
    pub is_active: Option<bool>,
}

impl FolderUpdate {
    pub fn apply_to(self, folder: &mut ExternalFolderConfig) {
        if let Some(name) = self.name {
            folder.name = name;
        }
        if let Some(storage) = self.storage_config {
            folder.storage_config = storage;
        }
        if let Some(monitor) = self.monitor_config {
            folder.monitor_config = monitor;
        }
        if let Some(processing) = self.processing_config {
            folder.processing_config = processing;
        }
        if let Some(active) = self.is_active {
            folder.is_active = active;
        }
        folder.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_camel_case_folder() {
        let folder: NewFolder = serde_json::from_value(json!({
            "name": "Recordings",
            "storageConfig": {"type": "local", "config": {"basePath": "/srv/audio"}},
            "monitorConfig": {"type": "polling"},
            "processingConfig": {
                "maxFileSize": 1048576,
                "allowedExtensions": ["mp3", "wav"],
                "autoStart": true
            }
        }))
        .unwrap();

        assert_eq!(folder.storage_config.provider_type, "local");
        assert_eq!(folder.monitor_config.config, json!({}));
        assert_eq!(folder.processing_config.max_file_size, Some(1_048_576));
        assert!(folder.processing_config.auto_start);
        assert!(folder.is_active);
    }

    #[test]
    fn test_update_only_touches_given_fields() {
        let mut folder = NewFolder {
            name: "A".to_string(),
            storage_config: ProviderConfig::new("local", json!({"basePath": "/a"})),
            monitor_config: ProviderConfig::new("polling", json!({})),
            processing_config: ProcessingConfig::default(),
            is_active: true,
        }
        .into_config();
        let before = folder.clone();

        FolderUpdate {
            is_active: Some(false),
            ..Default::default()
        }
        .apply_to(&mut folder);

        assert!(!folder.is_active);
        assert_eq!(folder.name, before.name);
        assert_eq!(folder.storage_config, before.storage_config);
        assert!(folder.updated_at >= before.updated_at);
    }
}
