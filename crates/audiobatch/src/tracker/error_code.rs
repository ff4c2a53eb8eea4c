//! Error taxonomy for file processing failures.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationFailed,
    DownloadFailed,
    ConnectionFailed,
    AnalysisFailed,
    Timeout,
    UnsupportedFormat,
    FileNotFound,
    PermissionDenied,
    Cancelled,
    UnknownError,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 10] = [
        Self::ValidationFailed,
        Self::DownloadFailed,
        Self::ConnectionFailed,
        Self::AnalysisFailed,
        Self::Timeout,
        Self::UnsupportedFormat,
        Self::FileNotFound,
        Self::PermissionDenied,
        Self::Cancelled,
        Self::UnknownError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::DownloadFailed => "DOWNLOAD_FAILED",
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::AnalysisFailed => "ANALYSIS_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            Self::FileNotFound => "FILE_NOT_FOUND",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::Cancelled => "CANCELLED",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Whether a failure with this code may be requeued automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DownloadFailed | Self::ConnectionFailed | Self::AnalysisFailed | Self::Timeout
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::ValidationFailed => "The file failed validation (bad format or size)",
            Self::DownloadFailed => "The file could not be transferred from storage",
            Self::ConnectionFailed => "The storage backend could not be reached",
            Self::AnalysisFailed => "The analysis service reported an error",
            Self::Timeout => "The operation did not finish in time",
            Self::UnsupportedFormat => "The file format is not supported by analysis",
            Self::FileNotFound => "The file no longer exists in storage",
            Self::PermissionDenied => "Access to the file was denied",
            Self::Cancelled => "The batch job was cancelled before the file ran",
            Self::UnknownError => "An unclassified error occurred",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| format!("unknown error code '{}'", s))
    }
}

/// One row of the error-code catalogue shown to operators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorCodeDescription {
    pub code: ErrorCode,
    pub retryable: bool,
    pub description: &'static str,
}

pub fn error_code_descriptions() -> Vec<ErrorCodeDescription> {
    ErrorCode::ALL
        .into_iter()
        .map(|code| ErrorCodeDescription {
            code,
            retryable: code.is_retryable(),
            description: code.description(),
        })
        .collect()
}
