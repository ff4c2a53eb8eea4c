//! Batch jobs: one orchestrated run over a folder's discovered files.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelling,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        Self::Pending,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelling,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Statuses that block a second job for the same folder.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status '{}'", s))
    }
}

/// Per-job overrides. Unset fields fall back to the global batch config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_files: Option<u32>,
    /// Queue admitted files right away. When false the job waits in
    /// `pending` until it is resumed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub immediate_processing: Option<bool>,
    /// Return from start immediately and process in the background.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_processing: Option<bool>,
    /// Skip remote paths that already completed in an earlier job.
    #[serde(default)]
    pub only_new: bool,
}

/// Job-level counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCounters {
    pub total_files: u64,
    pub processed_files: u64,
    pub failed_files: u64,
    pub skipped_files: u64,
    pub cancelled_files: u64,
}

impl JobCounters {
    /// Admitted records that reached a final outcome.
    pub fn finished(&self) -> u64 {
        self.processed_files + self.failed_files + self.cancelled_files
    }

    /// Failed over total, in percent.
    pub fn failure_rate(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            self.failed_files as f64 * 100.0 / self.total_files as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub id: String,
    pub folder_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub priority: i32,
    pub status: JobStatus,
    #[serde(flatten)]
    pub counters: JobCounters,
    pub options: JobOptions,
    /// Failed records per error code, set when the job finishes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<BTreeMap<String, u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl BatchJob {
    pub fn new(folder_id: &str, default_name: &str, options: &JobOptions) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            folder_id: folder_id.to_string(),
            name: options
                .name
                .clone()
                .unwrap_or_else(|| default_name.to_string()),
            description: options.description.clone(),
            priority: options.priority,
            status: JobStatus::Pending,
            counters: JobCounters::default(),
            options: options.clone(),
            error_summary: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }
}
