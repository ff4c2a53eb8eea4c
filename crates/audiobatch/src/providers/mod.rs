//! Pluggable storage, monitor and notification backends.
//!
//! Each capability is a trait; concrete providers are separate types keyed
//! by a type string in the [`registry::ProviderRegistry`].

use std::fmt;

use serde::Serialize;

pub mod clock;
pub mod error;
pub mod monitor;
pub mod notification;
pub mod registry;
pub mod storage;

pub use clock::{Clock, SystemClock};
pub use error::{DownloadError, DownloadErrorKind, MonitorError, NotificationError, ProviderError, StorageError};
pub use monitor::{MonitorHandle, MonitorProvider, MonitorStatus, ScanCallback};
pub use notification::{Notification, NotificationProvider, SendReceipt};
pub use registry::ProviderRegistry;
pub use storage::{DownloadOutcome, RemoteFile, StorageProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderCategory {
    Storage,
    Monitor,
    Notification,
}

impl fmt::Display for ProviderCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Storage => "storage",
            Self::Monitor => "monitor",
            Self::Notification => "notification",
        };
        f.write_str(s)
    }
}

/// Outcome of a provider's own config check. Never involves I/O.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn ok() -> Self {
        Self::from_errors(Vec::new())
    }
}

/// Non-throwing result of a configuration-time connectivity test.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderTestResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl ProviderTestResult {
    pub fn success(message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            details,
        }
    }

    pub fn failure(error: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
            details,
        }
    }
}

/// Reads an optional string field from a JSON config object.
pub(crate) fn config_str<'a>(config: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    config.get(key).and_then(serde_json::Value::as_str)
}

/// Rejects anything but a JSON object, the shape every provider config has.
pub(crate) fn require_object(config: &serde_json::Value, errors: &mut Vec<String>) -> bool {
    if config.is_object() {
        true
    } else {
        errors.push("config must be an object".to_string());
        false
    }
}
