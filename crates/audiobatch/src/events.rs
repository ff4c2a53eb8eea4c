//! Batch event broadcaster for real-time status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::orchestrator::job::{JobCounters, JobStatus};
use crate::tracker::error_code::ErrorCode;
use crate::tracker::status::FileStatus;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchEvent {
    #[serde(rename_all = "camelCase")]
    FileStatusChanged {
        job_id: String,
        record_id: String,
        file_name: String,
        from: FileStatus,
        to: FileStatus,
        retry_count: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    JobStatusChanged {
        job_id: String,
        status: JobStatus,
        counters: JobCounters,
        timestamp: DateTime<Utc>,
    },
}

impl BatchEvent {
    pub fn job_id(&self) -> &str {
        match self {
            Self::FileStatusChanged { job_id, .. } | Self::JobStatusChanged { job_id, .. } => job_id,
        }
    }
}

/// Fans batch events out to any number of subscribers.
#[derive(Clone)]
pub struct BatchEventBroadcaster {
    sender: Arc<broadcast::Sender<BatchEvent>>,
}

impl BatchEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: BatchEvent) {
        // No active receivers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.sender.subscribe()
    }

    pub fn job_status(&self, job_id: &str, status: JobStatus, counters: JobCounters) {
        self.send(BatchEvent::JobStatusChanged {
            job_id: job_id.to_string(),
            status,
            counters,
            timestamp: Utc::now(),
        });
    }
}

impl Default for BatchEventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
