//! The tracker service: the only code that mutates file records.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use log::{debug, warn};
use serde_json::Value;

use super::error_code::{error_code_descriptions, ErrorCode, ErrorCodeDescription};
use super::record::{
    status_descriptions, FileProcessingRecord, NewRecord, Pagination, ProcessingStats, RecordFilter,
    RecordPage, RecordSort, StatusDescription,
};
use super::status::{FileStatus, TransitionCause};
use crate::db::log_repo::{self, NewLogEntry, ProcessingLogEntry};
use crate::db::{record_repo, stats_repo, Database};
use crate::error::TrackerError;
use crate::events::{BatchEvent, BatchEventBroadcaster};

/// Data carried by a transition. Fields that do not apply to the target
/// status are ignored.
#[derive(Debug, Clone, Default)]
pub struct TransitionDetail {
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
    pub local_path: Option<String>,
    pub file_size: Option<u64>,
    pub result_ref: Option<String>,
    /// Free text for the processing log.
    pub message: Option<String>,
}

impl TransitionDetail {
    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code: Some(code),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.error_details = Some(details);
        self
    }
}

type ClaimSet = Arc<Mutex<HashSet<String>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("Tracker lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Exclusive ownership of one record by one worker. Released on drop.
#[derive(Debug)]
pub struct RecordClaim {
    record_id: String,
    claims: ClaimSet,
}

impl RecordClaim {
    pub fn record_id(&self) -> &str {
        &self.record_id
    }
}

impl Drop for RecordClaim {
    fn drop(&mut self) {
        lock(&self.claims).remove(&self.record_id);
    }
}

pub struct FileStatusTracker {
    db: Database,
    events: BatchEventBroadcaster,
    claims: ClaimSet,
    /// Serializes read-check-write of transitions.
    transition_lock: Mutex<()>,
}

impl FileStatusTracker {
    pub fn new(db: Database, events: BatchEventBroadcaster) -> Self {
        Self {
            db,
            events,
            claims: Arc::new(Mutex::new(HashSet::new())),
            transition_lock: Mutex::new(()),
        }
    }

    pub fn events(&self) -> &BatchEventBroadcaster {
        &self.events
    }

    pub fn create_record(&self, new: NewRecord) -> Result<FileProcessingRecord, TrackerError> {
        let mut records = self.create_records(vec![new])?;
        records
            .pop()
            .ok_or_else(|| TrackerError::RecordNotFound("new record".to_string()))
    }

    /// Inserts records and their first log entries in order within one
    /// transaction.
    pub fn create_records(&self, new: Vec<NewRecord>) -> Result<Vec<FileProcessingRecord>, TrackerError> {
        let records: Vec<_> = new.into_iter().map(NewRecord::into_record).collect();
        self.db.with_tx(|tx| {
            for record in &records {
                record_repo::insert_with(tx, record)?;
                log_repo::append_with(tx, &log_entry(record, None, TransitionCause::Pipeline, Some("discovered")))?;
            }
            Ok(())
        })?;
        Ok(records)
    }

    pub fn get_record(&self, record_id: &str) -> Result<FileProcessingRecord, TrackerError> {
        record_repo::find_by_id(&self.db, record_id)?
            .ok_or_else(|| TrackerError::RecordNotFound(record_id.to_string()))
    }

    /// Takes exclusive ownership of a record for one worker.
    pub fn claim(&self, record_id: &str) -> Result<RecordClaim, TrackerError> {
        let mut claims = lock(&self.claims);
        if !claims.insert(record_id.to_string()) {
            return Err(TrackerError::RecordBusy(record_id.to_string()));
        }
        Ok(RecordClaim {
            record_id: record_id.to_string(),
            claims: Arc::clone(&self.claims),
        })
    }

    pub fn is_claimed(&self, record_id: &str) -> bool {
        lock(&self.claims).contains(record_id)
    }

    /// Applies one edge of the state machine. Illegal edges fail with
    /// [`TrackerError::InvalidTransition`] and change nothing.
    pub fn transition(
        &self,
        record_id: &str,
        to: FileStatus,
        cause: TransitionCause,
        detail: TransitionDetail,
    ) -> Result<FileProcessingRecord, TrackerError> {
        let (record, from) = {
            let _guard = lock(&self.transition_lock);
            let mut record = self.get_record(record_id)?;
            let from = record.status;

            if !from.can_transition_to(to, cause) || !self.retry_allowed(&record, to, cause) {
                return Err(TrackerError::InvalidTransition {
                    record_id: record_id.to_string(),
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }

            apply(&mut record, to, cause, &detail);
            self.db.with_tx(|tx| {
                record_repo::update_with(tx, &record)?;
                log_repo::append_with(tx, &log_entry(&record, Some(from), cause, detail.message.as_deref()))?;
                Ok(())
            })?;
            (record, from)
        };

        debug!(
            "Record {} ({}): {} -> {} [{}]",
            record.id,
            record.file_name,
            from,
            to,
            cause.as_str()
        );
        self.events.send(BatchEvent::FileStatusChanged {
            job_id: record.batch_job_id.clone(),
            record_id: record.id.clone(),
            file_name: record.file_name.clone(),
            from,
            to,
            retry_count: record.retry_count,
            error_code: record.error_code,
            timestamp: record.updated_at,
        });
        Ok(record)
    }

    /// `failed -> retrying` needs a retryable code and remaining budget.
    fn retry_allowed(&self, record: &FileProcessingRecord, to: FileStatus, cause: TransitionCause) -> bool {
        if cause != TransitionCause::Pipeline || record.status != FileStatus::Failed || to != FileStatus::Retrying {
            return true;
        }
        record.error_code.is_some_and(|c| c.is_retryable()) && record.retry_count < record.max_retries
    }

    /// Whether a failed record would be requeued automatically.
    pub fn can_auto_retry(record: &FileProcessingRecord) -> bool {
        record.status == FileStatus::Failed
            && record.error_code.is_some_and(|c| c.is_retryable())
            && record.retry_count < record.max_retries
    }

    /// Operator requeue of a failed record, regardless of exhausted budget.
    /// The retry count is kept as is.
    pub fn retry(&self, record_id: &str) -> Result<FileProcessingRecord, TrackerError> {
        self.transition(
            record_id,
            FileStatus::Queued,
            TransitionCause::ManualRetry,
            TransitionDetail::message("manual retry"),
        )
    }

    /// Marks a record that never ran as skipped because its job was cancelled.
    pub fn cancel(&self, record_id: &str) -> Result<FileProcessingRecord, TrackerError> {
        self.transition(
            record_id,
            FileStatus::Skipped,
            TransitionCause::Cancellation,
            TransitionDetail::failure(ErrorCode::Cancelled, "batch job cancelled"),
        )
    }

    /// Requeues work interrupted by a restart without touching the budget.
    pub fn recover(&self, record_id: &str) -> Result<FileProcessingRecord, TrackerError> {
        self.transition(
            record_id,
            FileStatus::Queued,
            TransitionCause::Recovery,
            TransitionDetail::message("requeued after restart"),
        )
    }

    pub fn list_records(
        &self,
        filter: &RecordFilter,
        page: Pagination,
        sort: RecordSort,
    ) -> Result<RecordPage, TrackerError> {
        let (records, total) = record_repo::query(&self.db, filter, page, sort)?;
        Ok(RecordPage { records, total })
    }

    pub fn get_processing_stats(&self, filter: &RecordFilter) -> Result<ProcessingStats, TrackerError> {
        Ok(stats_repo::processing_stats(&self.db, filter)?)
    }

    pub fn get_processing_logs(&self, record_id: &str) -> Result<Vec<ProcessingLogEntry>, TrackerError> {
        // Distinguish "no such record" from "no entries".
        self.get_record(record_id)?;
        Ok(log_repo::list_for_record(&self.db, record_id)?)
    }

    pub fn get_error_code_descriptions(&self) -> Vec<ErrorCodeDescription> {
        error_code_descriptions()
    }

    pub fn get_status_descriptions(&self) -> Vec<StatusDescription> {
        status_descriptions()
    }
}

/// The log row for a record that just reached its current status.
fn log_entry<'a>(
    record: &'a FileProcessingRecord,
    from: Option<FileStatus>,
    cause: TransitionCause,
    message: Option<&'a str>,
) -> NewLogEntry<'a> {
    let message = message.or(match record.status {
        FileStatus::Failed | FileStatus::Skipped => record.error_message.as_deref(),
        _ => None,
    });
    NewLogEntry {
        file_record_id: &record.id,
        batch_job_id: &record.batch_job_id,
        from_status: from.map(|s| s.as_str()),
        to_status: record.status.as_str(),
        cause: cause.as_str(),
        error_code: record.error_code.map(|c| c.as_str()),
        message,
    }
}

/// Field updates that accompany each target status.
fn apply(record: &mut FileProcessingRecord, to: FileStatus, cause: TransitionCause, detail: &TransitionDetail) {
    let now = Utc::now();
    let finish = |record: &mut FileProcessingRecord| {
        record.processing_completed_at = Some(now);
        record.duration_ms = record
            .processing_started_at
            .map(|started| (now - started).num_milliseconds().max(0));
    };

    match to {
        FileStatus::Downloading => {
            record.processing_started_at.get_or_insert(now);
            record.processing_completed_at = None;
        }
        FileStatus::Processing => {
            if detail.local_path.is_some() {
                record.local_path = detail.local_path.clone();
            }
            if detail.file_size.is_some() {
                record.file_size = detail.file_size;
            }
        }
        FileStatus::Completed => {
            record.result_ref = detail.result_ref.clone();
            record.error_code = None;
            record.error_message = None;
            record.error_details = None;
            finish(record);
        }
        FileStatus::Failed | FileStatus::Skipped => {
            record.error_code = detail.error_code.or(Some(ErrorCode::UnknownError));
            record.error_message = detail.error_message.clone();
            record.error_details = detail.error_details.clone();
            finish(record);
        }
        FileStatus::Retrying => {
            record.retry_count += 1;
        }
        FileStatus::Queued => {
            record.processing_completed_at = None;
            if cause == TransitionCause::ManualRetry {
                record.duration_ms = None;
            }
        }
        FileStatus::Discovered => {}
    }
    record.status = to;
    record.updated_at = now;
}
