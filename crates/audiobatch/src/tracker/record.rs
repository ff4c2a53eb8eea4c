//! File processing records and the query shapes used to list them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error_code::ErrorCode;
use super::status::FileStatus;

/// Per-file state and history within a batch job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileProcessingRecord {
    pub id: String,
    pub batch_job_id: String,
    pub folder_id: String,
    pub file_name: String,
    pub remote_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<Value>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// Opaque link to the analysis outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What the orchestrator knows about a file when it creates its record.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub batch_job_id: String,
    pub folder_id: String,
    pub file_name: String,
    pub remote_path: String,
    pub file_size: Option<u64>,
    pub max_retries: u32,
}

impl NewRecord {
    pub fn into_record(self) -> FileProcessingRecord {
        let now = Utc::now();
        FileProcessingRecord {
            id: uuid::Uuid::new_v4().to_string(),
            batch_job_id: self.batch_job_id,
            folder_id: self.folder_id,
            file_name: self.file_name,
            remote_path: self.remote_path,
            local_path: None,
            file_size: self.file_size,
            status: FileStatus::Discovered,
            error_code: None,
            error_message: None,
            error_details: None,
            retry_count: 0,
            max_retries: self.max_retries,
            processing_started_at: None,
            processing_completed_at: None,
            duration_ms: None,
            result_ref: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFilter {
    pub batch_job_id: Option<String>,
    pub folder_id: Option<String>,
    pub status: Option<FileStatus>,
    pub error_code: Option<ErrorCode>,
    /// Case-insensitive substring of the file name.
    pub file_name: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u64,
    pub offset: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

/// Columns records may be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordSortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    FileName,
    Status,
    RetryCount,
    FileSize,
    DurationMs,
}

impl RecordSortField {
    pub fn column(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::FileName => "file_name",
            Self::Status => "status",
            Self::RetryCount => "retry_count",
            Self::FileSize => "file_size",
            Self::DurationMs => "duration_ms",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RecordSort {
    pub field: RecordSortField,
    pub descending: bool,
}

/// A page of records plus the total number matching the filter.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPage {
    pub records: Vec<FileProcessingRecord>,
    pub total: u64,
}

/// Aggregates over the records matching a filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    pub total: u64,
    pub discovered: u64,
    pub queued: u64,
    pub downloading: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub retrying: u64,
    pub skipped: u64,
    /// Completed over completed plus failed, in percent.
    pub success_rate: f64,
    pub average_duration_ms: Option<f64>,
    pub total_retries: u64,
}

impl ProcessingStats {
    pub fn add_status(&mut self, status: FileStatus, count: u64) {
        let slot = match status {
            FileStatus::Discovered => &mut self.discovered,
            FileStatus::Queued => &mut self.queued,
            FileStatus::Downloading => &mut self.downloading,
            FileStatus::Processing => &mut self.processing,
            FileStatus::Completed => &mut self.completed,
            FileStatus::Failed => &mut self.failed,
            FileStatus::Retrying => &mut self.retrying,
            FileStatus::Skipped => &mut self.skipped,
        };
        *slot += count;
        self.total += count;
    }

    pub fn finish(&mut self) {
        let finished = self.completed + self.failed;
        self.success_rate = if finished == 0 {
            0.0
        } else {
            self.completed as f64 * 100.0 / finished as f64
        };
    }
}

/// One row of the status catalogue shown to operators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDescription {
    pub status: FileStatus,
    pub terminal: bool,
    pub description: &'static str,
}

pub fn status_descriptions() -> Vec<StatusDescription> {
    FileStatus::ALL
        .into_iter()
        .map(|status| StatusDescription {
            status,
            terminal: status.is_terminal(),
            description: status.description(),
        })
        .collect()
}
