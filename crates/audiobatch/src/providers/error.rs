use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::secrets::SecretError;
use crate::tracker::error_code::ErrorCode;

use super::ProviderCategory;

/// Failures of the registry's create path.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Unknown {category} provider type '{provider_type}' (registered: {})", .known.join(", "))]
    NotFound {
        category: ProviderCategory,
        provider_type: String,
        known: Vec<String>,
    },

    #[error("Invalid {provider_type} provider config: {}", .errors.join("; "))]
    InvalidConfig {
        provider_type: String,
        errors: Vec<String>,
    },

    #[error("Failed to connect {provider_type} provider: {message}")]
    ConnectionFailed {
        provider_type: String,
        message: String,
    },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage provider is not connected")]
    NotConnected,

    #[error("Invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path does not exist: {0}")]
    PathNotFound(PathBuf),

    #[error("Permission denied for path '{0}'")]
    PermissionDenied(PathBuf),

    #[error("Object store request failed: {0}")]
    Request(String),

    #[error("Object store returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Invalid object store response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Download(#[from] DownloadError),
}

impl StorageError {
    /// Classification used when a storage failure ends a record attempt.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotConnected | Self::Request(_) => ErrorCode::ConnectionFailed,
            Self::PathNotFound(_) => ErrorCode::FileNotFound,
            Self::PermissionDenied(_) => ErrorCode::PermissionDenied,
            Self::Http { status, .. } => match status {
                403 => ErrorCode::PermissionDenied,
                404 => ErrorCode::FileNotFound,
                408 | 504 => ErrorCode::Timeout,
                _ => ErrorCode::ConnectionFailed,
            },
            Self::Io { .. } | Self::InvalidResponse(_) => ErrorCode::DownloadFailed,
            Self::InvalidConfig(_) => ErrorCode::UnknownError,
            Self::Download(e) => e.error_code(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadErrorKind {
    Timeout,
    NotFound,
    PermissionDenied,
    Connection,
    Transfer,
}

impl fmt::Display for DownloadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::NotFound => "not found",
            Self::PermissionDenied => "permission denied",
            Self::Connection => "connection",
            Self::Transfer => "transfer",
        };
        f.write_str(s)
    }
}

/// A failed transfer, with the backend's own error code when it gave one.
#[derive(Error, Debug, Clone)]
#[error("Download of '{remote_path}' failed ({kind}): {message}")]
pub struct DownloadError {
    pub kind: DownloadErrorKind,
    pub remote_path: String,
    pub message: String,
    pub native_code: Option<String>,
}

impl DownloadError {
    pub fn new(kind: DownloadErrorKind, remote_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            remote_path: remote_path.into(),
            message: message.into(),
            native_code: None,
        }
    }

    pub fn with_native_code(mut self, code: impl Into<String>) -> Self {
        self.native_code = Some(code.into());
        self
    }

    pub fn from_io(remote_path: impl Into<String>, e: &std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::NotFound => DownloadErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => DownloadErrorKind::PermissionDenied,
            std::io::ErrorKind::TimedOut => DownloadErrorKind::Timeout,
            _ => DownloadErrorKind::Transfer,
        };
        let mut err = Self::new(kind, remote_path, e.to_string());
        if let Some(code) = e.raw_os_error() {
            err.native_code = Some(format!("errno {}", code));
        }
        err
    }

    pub fn error_code(&self) -> ErrorCode {
        match self.kind {
            DownloadErrorKind::Timeout => ErrorCode::Timeout,
            DownloadErrorKind::NotFound => ErrorCode::FileNotFound,
            DownloadErrorKind::PermissionDenied => ErrorCode::PermissionDenied,
            DownloadErrorKind::Connection => ErrorCode::ConnectionFailed,
            DownloadErrorKind::Transfer => ErrorCode::DownloadFailed,
        }
    }
}

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Monitor handle not found: {0}")]
    HandleNotFound(String),

    #[error("Monitor provider is not configured")]
    NotConfigured,

    #[error("Invalid monitor config: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    #[error("Scan failed: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Notification provider is not configured")]
    NotConfigured,

    #[error("Notification provider is disabled")]
    Disabled,

    #[error("Secret resolution failed: {0}")]
    Secret(#[from] SecretError),

    #[error("Notification request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Notification endpoint returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid notification config: {0}")]
    InvalidConfig(String),
}
