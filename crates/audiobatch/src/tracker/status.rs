//! The per-file state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a file processing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Discovered,
    Queued,
    Downloading,
    Processing,
    Completed,
    Failed,
    Retrying,
    Skipped,
}

/// Why a transition is being applied. Some edges are only legal for a
/// particular cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    /// Normal worker or admission progress.
    Pipeline,
    /// Operator requeue of a failed record.
    ManualRetry,
    /// The owning job is being cancelled.
    Cancellation,
    /// Startup requeue of work interrupted by a restart.
    Recovery,
}

impl TransitionCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pipeline => "pipeline",
            Self::ManualRetry => "manual_retry",
            Self::Cancellation => "cancellation",
            Self::Recovery => "recovery",
        }
    }
}

impl FileStatus {
    pub const ALL: [FileStatus; 8] = [
        Self::Discovered,
        Self::Queued,
        Self::Downloading,
        Self::Processing,
        Self::Completed,
        Self::Failed,
        Self::Retrying,
        Self::Skipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
            Self::Skipped => "skipped",
        }
    }

    /// Completed, failed or skipped. A failed record may still be retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Owned by a worker and doing I/O.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Downloading | Self::Processing)
    }

    /// Whether the edge `self -> to` exists for `cause`. Retry budget and
    /// error classification for `failed -> retrying` are checked by the tracker.
    pub fn can_transition_to(&self, to: FileStatus, cause: TransitionCause) -> bool {
        use FileStatus::*;
        match cause {
            TransitionCause::Pipeline => matches!(
                (self, to),
                (Discovered, Queued)
                    | (Discovered, Skipped)
                    | (Queued, Downloading)
                    | (Downloading, Processing)
                    | (Downloading, Failed)
                    | (Processing, Completed)
                    | (Processing, Failed)
                    | (Failed, Retrying)
                    | (Retrying, Queued)
            ),
            TransitionCause::ManualRetry => matches!((self, to), (Failed, Queued)),
            TransitionCause::Cancellation => {
                matches!((self, to), (Discovered | Queued | Retrying, Skipped))
            }
            TransitionCause::Recovery => {
                matches!((self, to), (Downloading | Processing | Retrying, Queued))
            }
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Discovered => "Found by a scan and admitted, not yet queued",
            Self::Queued => "Waiting for a free worker",
            Self::Downloading => "Being transferred from external storage",
            Self::Processing => "Handed to the analysis service",
            Self::Completed => "Analysis finished successfully",
            Self::Failed => "Processing failed",
            Self::Retrying => "Waiting for the retry backoff to elapse",
            Self::Skipped => "Not processed (rejected by admission rules or cancelled)",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown file status '{}'", s))
    }
}
