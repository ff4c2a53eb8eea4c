//! The boundary to the external analysis service.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::config::AnalysisSettings;
use crate::sanitize::redact_url;
use crate::tracker::{ErrorCode, FileProcessingRecord};

/// What the analysis service is told about a downloaded file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub file_name: String,
    pub remote_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    pub mime_type: String,
    pub folder_id: String,
    pub job_id: String,
}

impl FileMetadata {
    pub fn for_record(record: &FileProcessingRecord, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            file_name: record.file_name.clone(),
            remote_path: record.remote_path.clone(),
            size: record.file_size,
            modified,
            mime_type: mime_guess::from_path(&record.file_name)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
            folder_id: record.folder_id.clone(),
            job_id: record.batch_job_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutcome {
    pub result_ref: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Rejected by analysis: {0}")]
    Validation(String),

    #[error("Analysis timed out after {0:?}")]
    Timeout(Duration),

    #[error("Analysis failed: {0}")]
    Failed(String),
}

impl AnalysisError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedFormat(_) => ErrorCode::UnsupportedFormat,
            Self::Validation(_) => ErrorCode::ValidationFailed,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::Failed(_) => ErrorCode::AnalysisFailed,
        }
    }
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, local_path: &Path, metadata: &FileMetadata) -> Result<AnalysisOutcome, AnalysisError>;
}

/// Posts `{localPath, metadata}` to the configured endpoint and expects
/// `{resultRef}` back.
pub struct HttpAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpAnalyzer {
    pub fn new(settings: &AnalysisSettings) -> Result<Self, AnalysisError> {
        let timeout = Duration::from_secs(settings.timeout_seconds);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalysisError::Failed(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    async fn analyze(&self, local_path: &Path, metadata: &FileMetadata) -> Result<AnalysisOutcome, AnalysisError> {
        debug!(
            "Requesting analysis of {} from {}",
            metadata.file_name,
            redact_url(&self.endpoint)
        );
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "localPath": local_path.to_string_lossy(),
                "metadata": metadata,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Timeout(self.timeout)
                } else {
                    AnalysisError::Failed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                415 => AnalysisError::UnsupportedFormat(body),
                422 => AnalysisError::Validation(body),
                408 | 504 => AnalysisError::Timeout(self.timeout),
                code => AnalysisError::Failed(format!("HTTP {}: {}", code, body)),
            });
        }

        response.json::<AnalysisOutcome>().await.map_err(|e| {
            if e.is_timeout() {
                AnalysisError::Timeout(self.timeout)
            } else {
                AnalysisError::Failed(format!("invalid analysis response: {}", e))
            }
        })
    }
}
