//! Runs one batch job: a bounded pool of record pipelines, retry timers
//! that hold no worker slot, and cooperative cancellation.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinSet;
use tracing::{info_span, Instrument};

use super::analysis::{AnalysisError, Analyzer, FileMetadata};
use super::backoff::retry_delay;
use super::job::{BatchJob, JobStatus};
use crate::config::{ExternalFolderConfig, GlobalBatchConfig};
use crate::db::job_repo::{self, JobCounter};
use crate::db::{record_repo, Database};
use crate::dispatch::NotificationDispatcher;
use crate::error::OrchestratorError;
use crate::providers::{Clock, DownloadError, StorageProvider};
use crate::tracker::{
    ErrorCode, FileProcessingRecord, FileStatus, FileStatusTracker, TransitionCause, TransitionDetail,
};

/// Cancellation flag shared by the orchestrator and a running job.
#[derive(Debug, Default)]
pub struct JobControl {
    cancelled: AtomicBool,
    notify: Notify,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        // notify_one keeps a permit if nobody is waiting yet.
        self.notify.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.notify.notified().await;
        }
    }
}

/// Everything one job run needs. Built by the orchestrator.
pub struct JobRun {
    pub job: BatchJob,
    pub folder: ExternalFolderConfig,
    /// Captured when the job started; later reloads do not apply.
    pub config: Arc<GlobalBatchConfig>,
    pub storage: Arc<dyn StorageProvider>,
    pub analyzer: Arc<dyn Analyzer>,
    pub tracker: Arc<FileStatusTracker>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub db: Database,
    pub clock: Arc<dyn Clock>,
    pub download_dir: PathBuf,
    pub control: Arc<JobControl>,
    /// Modification times from the scan, by remote path.
    pub modified: HashMap<String, DateTime<Utc>>,
    /// Serializes downloads when the storage provider is not reentrant.
    download_gate: Option<AsyncMutex<()>>,
    /// Per-file notifications in flight. Drained before the job finalizes.
    notices: Mutex<JoinSet<()>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RecordOutcome {
    Completed,
    Failed,
    Retry(Duration),
    /// The record was not ours to run (claimed elsewhere or cancelled first).
    Abandoned,
}

struct StageFailure {
    code: ErrorCode,
    message: String,
    details: Value,
}

impl From<DownloadError> for StageFailure {
    fn from(e: DownloadError) -> Self {
        Self {
            code: e.error_code(),
            message: e.to_string(),
            details: json!({
                "stage": "download",
                "kind": e.kind.to_string(),
                "nativeCode": e.native_code,
            }),
        }
    }
}

impl From<AnalysisError> for StageFailure {
    fn from(e: AnalysisError) -> Self {
        Self {
            code: e.error_code(),
            message: e.to_string(),
            details: json!({"stage": "analysis"}),
        }
    }
}

impl JobRun {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job: BatchJob,
        folder: ExternalFolderConfig,
        config: Arc<GlobalBatchConfig>,
        storage: Arc<dyn StorageProvider>,
        analyzer: Arc<dyn Analyzer>,
        tracker: Arc<FileStatusTracker>,
        dispatcher: Arc<NotificationDispatcher>,
        db: Database,
        clock: Arc<dyn Clock>,
        download_dir: PathBuf,
        control: Arc<JobControl>,
    ) -> Self {
        let download_gate = (!storage.is_reentrant()).then(|| AsyncMutex::new(()));
        Self {
            job,
            folder,
            config,
            storage,
            analyzer,
            tracker,
            dispatcher,
            db,
            clock,
            download_dir,
            control,
            modified: HashMap::new(),
            download_gate,
            notices: Mutex::new(JoinSet::new()),
        }
    }

    pub fn with_modified_times(mut self, modified: HashMap<String, DateTime<Utc>>) -> Self {
        self.modified = modified;
        self
    }

    fn notices(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.notices.lock().unwrap_or_else(|poisoned| {
            warn!("Notification task lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Delivers a `file_failed` notification without holding the worker.
    fn notify_file_failed(&self, job: BatchJob, record: FileProcessingRecord) {
        let dispatcher = Arc::clone(&self.dispatcher);
        self.notices().spawn(
            async move {
                dispatcher.file_failed(&job, &record).await;
            }
            .in_current_span(),
        );
    }

    async fn drain_notices(&self) {
        let mut pending = std::mem::take(&mut *self.notices());
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                warn!("Notification task of job {} ended abnormally: {}", self.job.id, e);
            }
        }
    }

    fn worker_count(&self) -> usize {
        self.config.worker_count(self.job.options.max_concurrent_files) as usize
    }

    fn record_dir(&self, record: &FileProcessingRecord) -> PathBuf {
        self.download_dir.join(&self.job.id).join(&record.id)
    }

    fn local_path(&self, record: &FileProcessingRecord) -> PathBuf {
        let name = Path::new(&record.file_name)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "download".into());
        self.record_dir(record).join(name)
    }

    async fn remove_download(&self, record: &FileProcessingRecord) {
        if self.config.keep_downloads {
            return;
        }
        let dir = self.record_dir(record);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove download of record {}: {}", record.id, e);
            }
        }
    }

    fn publish_counters(&self) {
        match job_repo::find_by_id(&self.db, &self.job.id) {
            Ok(Some(job)) => self.tracker.events().job_status(&job.id, job.status, job.counters),
            Ok(None) => {}
            Err(e) => warn!("Failed to load job {} for progress: {}", self.job.id, e),
        }
    }

    fn bump(&self, counter: JobCounter) {
        if let Err(e) = job_repo::increment(&self.db, &self.job.id, counter, 1) {
            error!("Failed to update {:?} counter of job {}: {}", counter, self.job.id, e);
        }
    }

    /// Moves a record that never ran to `skipped`. Returns whether it did.
    fn cancel_record(&self, record_id: &str) -> bool {
        match self.tracker.cancel(record_id) {
            Ok(_) => {
                self.bump(JobCounter::Cancelled);
                true
            }
            Err(e) => {
                debug!("Record {} not cancelled: {}", record_id, e);
                false
            }
        }
    }

    /// Cancels every record of the job that has not started. In-flight
    /// records are left to finish.
    fn cancel_pending(&self) -> Result<usize, OrchestratorError> {
        let pending = record_repo::list_for_job(
            &self.db,
            &self.job.id,
            &[FileStatus::Discovered, FileStatus::Queued, FileStatus::Retrying],
        )?;
        Ok(pending.iter().filter(|r| self.cancel_record(&r.id)).count())
    }

    async fn download(&self, record: &FileProcessingRecord, local_path: &Path) -> Result<u64, StageFailure> {
        let _gate = match &self.download_gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };
        let outcome = self.storage.download_file(&record.remote_path, local_path).await?;
        Ok(outcome.size)
    }

    async fn analyze(&self, record: &FileProcessingRecord, local_path: &Path) -> Result<String, StageFailure> {
        let metadata = FileMetadata::for_record(record, self.modified.get(&record.remote_path).copied());
        let limit = Duration::from_secs(self.config.analysis_timeout_seconds);
        match tokio::time::timeout(limit, self.analyzer.analyze(local_path, &metadata)).await {
            Ok(result) => Ok(result?.result_ref),
            Err(_) => Err(AnalysisError::Timeout(limit).into()),
        }
    }

    /// One attempt of one record. Failures end in a transition, never an
    /// error.
    async fn run_record(&self, record_id: &str) -> RecordOutcome {
        let _claim = match self.tracker.claim(record_id) {
            Ok(claim) => claim,
            Err(e) => {
                debug!("Skipping record {}: {}", record_id, e);
                return RecordOutcome::Abandoned;
            }
        };
        let record = match self.tracker.transition(
            record_id,
            FileStatus::Downloading,
            TransitionCause::Pipeline,
            TransitionDetail::default(),
        ) {
            Ok(record) => record,
            Err(e) => {
                debug!("Record {} not started: {}", record_id, e);
                return RecordOutcome::Abandoned;
            }
        };

        let local_path = self.local_path(&record);
        let result = async {
            let size = self.download(&record, &local_path).await?;
            let processing = self
                .tracker
                .transition(
                    &record.id,
                    FileStatus::Processing,
                    TransitionCause::Pipeline,
                    TransitionDetail {
                        local_path: Some(local_path.to_string_lossy().into_owned()),
                        file_size: Some(size),
                        ..Default::default()
                    },
                )
                .map_err(|e| StageFailure {
                    code: ErrorCode::UnknownError,
                    message: e.to_string(),
                    details: json!({"stage": "tracker"}),
                })?;
            self.analyze(&processing, &local_path).await
        }
        .await;

        match result {
            Ok(result_ref) => self.complete(&record, result_ref).await,
            Err(failure) => self.fail(&record, failure).await,
        }
    }

    async fn complete(&self, record: &FileProcessingRecord, result_ref: String) -> RecordOutcome {
        let detail = TransitionDetail {
            result_ref: Some(result_ref),
            ..Default::default()
        };
        match self
            .tracker
            .transition(&record.id, FileStatus::Completed, TransitionCause::Pipeline, detail)
        {
            Ok(_) => {
                self.bump(JobCounter::Processed);
                self.remove_download(record).await;
                RecordOutcome::Completed
            }
            Err(e) => {
                error!("Failed to complete record {}: {}", record.id, e);
                RecordOutcome::Abandoned
            }
        }
    }

    async fn fail(&self, record: &FileProcessingRecord, failure: StageFailure) -> RecordOutcome {
        warn!(
            "Record {} ({}) failed with {}: {}",
            record.id, record.file_name, failure.code, failure.message
        );
        let failed = match self.tracker.transition(
            &record.id,
            FileStatus::Failed,
            TransitionCause::Pipeline,
            TransitionDetail::failure(failure.code, failure.message).with_details(failure.details),
        ) {
            Ok(failed) => failed,
            Err(e) => {
                error!("Failed to record failure of {}: {}", record.id, e);
                return RecordOutcome::Abandoned;
            }
        };
        self.remove_download(record).await;

        if FileStatusTracker::can_auto_retry(&failed) && !self.control.is_cancelled() {
            let message = format!("retry {} of {}", failed.retry_count + 1, failed.max_retries);
            match self.tracker.transition(
                &record.id,
                FileStatus::Retrying,
                TransitionCause::Pipeline,
                TransitionDetail::message(message),
            ) {
                Ok(retrying) => {
                    return RecordOutcome::Retry(retry_delay(&self.config.retry_config, retrying.retry_count));
                }
                Err(e) => warn!("Record {} could not be retried: {}", record.id, e),
            }
        }

        self.bump(JobCounter::Failed);
        match job_repo::find_by_id(&self.db, &self.job.id) {
            Ok(Some(job)) => self.notify_file_failed(job, failed),
            Ok(None) => {}
            Err(e) => warn!("Failed to load job {} for notification: {}", self.job.id, e),
        }
        RecordOutcome::Failed
    }

    fn requeue(&self, record_id: &str) -> bool {
        match self.tracker.transition(
            record_id,
            FileStatus::Queued,
            TransitionCause::Pipeline,
            TransitionDetail::message("retry backoff elapsed"),
        ) {
            Ok(_) => true,
            Err(e) => {
                debug!("Record {} not requeued: {}", record_id, e);
                false
            }
        }
    }

    async fn finalize(&self, cancelled: bool) -> Result<BatchJob, OrchestratorError> {
        self.drain_notices().await;
        let job = job_repo::find_by_id(&self.db, &self.job.id)?
            .ok_or_else(|| OrchestratorError::JobNotFound(self.job.id.clone()))?;
        let status = if cancelled {
            JobStatus::Cancelled
        } else if self
            .config
            .job_failure_policy
            .job_failed(job.counters.total_files, job.counters.failed_files)
        {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };
        let summary = record_repo::error_summary(&self.db, &job.id)?;
        job_repo::finish(&self.db, &job.id, status, &summary, Utc::now())?;

        let job = job_repo::find_by_id(&self.db, &job.id)?
            .ok_or_else(|| OrchestratorError::JobNotFound(self.job.id.clone()))?;
        self.tracker.events().job_status(&job.id, job.status, job.counters);
        self.dispatcher.job_finished(&job, &self.folder.name).await;
        Ok(job)
    }
}

/// Drives a job until every admitted record is final, then finalizes it.
pub async fn run_job(run: Arc<JobRun>) -> Result<BatchJob, OrchestratorError> {
    let job_id = run.job.id.clone();
    let limit = run.worker_count();

    for record in record_repo::list_for_job(&run.db, &job_id, &[FileStatus::Discovered])? {
        run.tracker.transition(
            &record.id,
            FileStatus::Queued,
            TransitionCause::Pipeline,
            TransitionDetail::default(),
        )?;
    }
    if !job_repo::mark_running(&run.db, &job_id, Utc::now())? {
        info!("Job {} was cancelled before it started running", job_id);
        run.control.cancel();
    }
    run.publish_counters();

    let mut ready: VecDeque<String> = record_repo::list_for_job(&run.db, &job_id, &[FileStatus::Queued])?
        .into_iter()
        .map(|r| r.id)
        .collect();
    info!("Job {} running {} records with {} workers", job_id, ready.len(), limit);

    let mut workers: JoinSet<(String, RecordOutcome)> = JoinSet::new();
    let mut timers: JoinSet<String> = JoinSet::new();
    let mut cancel_seen = false;

    loop {
        if !cancel_seen && run.control.is_cancelled() {
            cancel_seen = true;
            ready.clear();
            timers.shutdown().await;
            let skipped = run.cancel_pending()?;
            info!("Job {} cancelling: {} pending records skipped", job_id, skipped);
            run.publish_counters();
        }

        while !cancel_seen && workers.len() < limit {
            let Some(record_id) = ready.pop_front() else { break };
            let run = Arc::clone(&run);
            let span = info_span!("record", job_id = %job_id, record_id = %record_id);
            workers.spawn(
                async move {
                    let outcome = run.run_record(&record_id).await;
                    (record_id, outcome)
                }
                .instrument(span),
            );
        }

        if ready.is_empty() && workers.is_empty() && timers.is_empty() {
            break;
        }

        tokio::select! {
            Some(joined) = workers.join_next(), if !workers.is_empty() => match joined {
                Ok((record_id, RecordOutcome::Retry(delay))) => {
                    if cancel_seen || run.control.is_cancelled() {
                        run.cancel_record(&record_id);
                    } else {
                        debug!("Record {} retrying in {:?}", record_id, delay);
                        let clock = Arc::clone(&run.clock);
                        timers.spawn(async move {
                            clock.sleep(delay).await;
                            record_id
                        });
                    }
                    run.publish_counters();
                }
                Ok(_) => run.publish_counters(),
                Err(e) => error!("Record task of job {} ended abnormally: {}", job_id, e),
            },
            Some(joined) = timers.join_next(), if !timers.is_empty() => {
                if let Ok(record_id) = joined {
                    if run.requeue(&record_id) {
                        ready.push_back(record_id);
                    }
                }
            },
            _ = run.control.cancelled(), if !cancel_seen => {}
        }
    }

    let job = run.finalize(cancel_seen).await?;
    info!(
        "Job {} {}: processed={} failed={} skipped={} cancelled={}",
        job.id,
        job.status,
        job.counters.processed_files,
        job.counters.failed_files,
        job.counters.skipped_files,
        job.counters.cancelled_files
    );
    Ok(job)
}
