use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::{info_span, Instrument};

use super::admission::{Admission, AdmissionFilter};
use super::analysis::Analyzer;
use super::job::{BatchJob, JobOptions, JobStatus};
use super::runner::{run_job, JobControl, JobRun};
use crate::config::{BatchConfigHandle, ExternalFolderConfig, GlobalBatchConfig};
use crate::db::job_repo::{self, JobCounter};
use crate::db::{folder_repo, record_repo, Database};
use crate::dispatch::NotificationDispatcher;
use crate::error::OrchestratorError;
use crate::providers::{ProviderRegistry, RemoteFile, StorageProvider};
use crate::tracker::{
    ErrorCode, FileProcessingRecord, FileStatus, FileStatusTracker, NewRecord, TransitionCause, TransitionDetail,
};

/// Result of starting (or resuming) a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedJob {
    pub job_id: String,
    pub total_files: u64,
    pub skipped_files: u64,
    pub status: JobStatus,
}

impl From<&BatchJob> for StartedJob {
    fn from(job: &BatchJob) -> Self {
        Self {
            job_id: job.id.clone(),
            total_files: job.counters.total_files,
            skipped_files: job.counters.skipped_files,
            status: job.status,
        }
    }
}

/// A scanned file and what admission would do with it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedFile {
    #[serde(flatten)]
    pub file: RemoteFile,
    pub admission: Admission,
}

struct ActiveJob {
    control: Arc<JobControl>,
    done: watch::Receiver<bool>,
}

type ActiveJobs = Arc<Mutex<HashMap<String, ActiveJob>>>;

fn lock_active(active: &Mutex<HashMap<String, ActiveJob>>) -> MutexGuard<'_, HashMap<String, ActiveJob>> {
    active.lock().unwrap_or_else(|poisoned| {
        warn!("Active job map lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

pub struct BatchOrchestrator {
    db: Database,
    registry: Arc<ProviderRegistry>,
    tracker: Arc<FileStatusTracker>,
    analyzer: Arc<dyn Analyzer>,
    dispatcher: Arc<NotificationDispatcher>,
    batch_config: BatchConfigHandle,
    download_dir: PathBuf,
    active: ActiveJobs,
    /// Serializes the active-job check with job creation.
    start_lock: tokio::sync::Mutex<()>,
}

impl BatchOrchestrator {
    pub fn new(
        db: Database,
        registry: Arc<ProviderRegistry>,
        tracker: Arc<FileStatusTracker>,
        analyzer: Arc<dyn Analyzer>,
        dispatcher: Arc<NotificationDispatcher>,
        batch_config: BatchConfigHandle,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            registry,
            tracker,
            analyzer,
            dispatcher,
            batch_config,
            download_dir,
            active: Arc::new(Mutex::new(HashMap::new())),
            start_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn tracker(&self) -> &Arc<FileStatusTracker> {
        &self.tracker
    }

    pub fn batch_config(&self) -> &BatchConfigHandle {
        &self.batch_config
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    fn active_folder(&self, folder_id: &str) -> Result<ExternalFolderConfig, OrchestratorError> {
        let folder = folder_repo::find_by_id(&self.db, folder_id)?
            .ok_or_else(|| OrchestratorError::FolderNotFound(folder_id.to_string()))?;
        if !folder.is_active {
            return Err(OrchestratorError::FolderInactive(folder.name));
        }
        Ok(folder)
    }

    fn find_job(&self, job_id: &str) -> Result<BatchJob, OrchestratorError> {
        job_repo::find_by_id(&self.db, job_id)?.ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))
    }

    fn ensure_no_active_job(&self, folder_id: &str) -> Result<(), OrchestratorError> {
        match job_repo::find_active_for_folder(&self.db, folder_id)? {
            Some(job) => Err(OrchestratorError::JobAlreadyActive {
                folder_id: folder_id.to_string(),
                job_id: job.id,
            }),
            None => Ok(()),
        }
    }

    async fn open_storage(&self, folder: &ExternalFolderConfig) -> Result<Arc<dyn StorageProvider>, OrchestratorError> {
        let storage = self
            .registry
            .create_storage(&folder.storage_config.provider_type, &folder.storage_config.config)
            .await?;
        Ok(Arc::from(storage))
    }

    async fn scan(
        &self,
        folder: &ExternalFolderConfig,
        storage: Arc<dyn StorageProvider>,
    ) -> Result<Vec<RemoteFile>, OrchestratorError> {
        let monitor = self
            .registry
            .create_monitor(&folder.monitor_config.provider_type, &folder.monitor_config.config, storage)
            .await?;
        let files = monitor.scan_for_files(&folder.monitor_config.config).await?;
        info!("Scan of folder '{}' found {} files", folder.name, files.len());
        Ok(files)
    }

    /// Scans a folder and reports the admission verdict of every file.
    /// Creates nothing.
    pub async fn preview_scan(&self, folder_id: &str) -> Result<Vec<ScannedFile>, OrchestratorError> {
        let folder = folder_repo::find_by_id(&self.db, folder_id)?
            .ok_or_else(|| OrchestratorError::FolderNotFound(folder_id.to_string()))?;
        let storage = self.open_storage(&folder).await?;
        let files = self.scan(&folder, storage).await?;
        let filter = AdmissionFilter::new(&folder.processing_config)
            .with_settled(record_repo::settled_remote_paths(&self.db, &folder.id)?);
        Ok(files
            .into_iter()
            .map(|file| {
                let admission = filter.check(&file);
                ScannedFile { file, admission }
            })
            .collect())
    }

    /// Scans the folder, admits its files into a new job and runs it.
    pub async fn start_batch_processing(
        &self,
        folder_id: &str,
        options: JobOptions,
    ) -> Result<StartedJob, OrchestratorError> {
        validate_options(&options)?;
        let folder = self.active_folder(folder_id)?;
        self.ensure_no_active_job(&folder.id)?;

        let storage = self.open_storage(&folder).await?;
        let files = self.scan(&folder, Arc::clone(&storage)).await?;
        self.launch(folder, storage, files, options).await
    }

    /// Starts a job over files a monitor already listed.
    pub async fn start_batch_with_files(
        &self,
        folder_id: &str,
        files: Vec<RemoteFile>,
        options: JobOptions,
    ) -> Result<StartedJob, OrchestratorError> {
        validate_options(&options)?;
        let folder = self.active_folder(folder_id)?;
        self.ensure_no_active_job(&folder.id)?;
        let storage = self.open_storage(&folder).await?;
        self.launch(folder, storage, files, options).await
    }

    async fn launch(
        &self,
        folder: ExternalFolderConfig,
        storage: Arc<dyn StorageProvider>,
        files: Vec<RemoteFile>,
        options: JobOptions,
    ) -> Result<StartedJob, OrchestratorError> {
        let guard = self.start_lock.lock().await;
        self.ensure_no_active_job(&folder.id)?;

        let config = self.batch_config.snapshot();
        let mut filter = AdmissionFilter::new(&folder.processing_config);
        if options.only_new {
            filter = filter.with_settled(record_repo::settled_remote_paths(&self.db, &folder.id)?);
        }

        let mut admitted = Vec::new();
        let mut rejected = Vec::new();
        for file in &files {
            match filter.check(file) {
                Admission::Admit => admitted.push(file),
                Admission::Reject { reason } => rejected.push((file, reason)),
                Admission::AlreadyProcessed => {}
            }
        }
        if options.only_new && admitted.is_empty() {
            return Err(OrchestratorError::NoNewFiles(folder.id));
        }

        let default_name = format!("{} {}", folder.name, Utc::now().format("%Y-%m-%d %H:%M"));
        let job = BatchJob::new(&folder.id, &default_name, &options);
        job_repo::insert(&self.db, &job)?;

        let max_retries = config.retry_config.effective_max_retries();
        let new_record = |file: &RemoteFile| NewRecord {
            batch_job_id: job.id.clone(),
            folder_id: folder.id.clone(),
            file_name: file.name.clone(),
            remote_path: file.path.clone(),
            file_size: Some(file.size),
            max_retries,
        };
        // Discovery order is kept: admitted first, then rejects.
        self.tracker
            .create_records(admitted.iter().map(|f| new_record(*f)).collect())?;
        let skipped = self
            .tracker
            .create_records(rejected.iter().map(|(f, _)| new_record(*f)).collect())?;
        for (record, (_, reason)) in skipped.iter().zip(&rejected) {
            self.tracker.transition(
                &record.id,
                FileStatus::Skipped,
                TransitionCause::Pipeline,
                TransitionDetail::failure(ErrorCode::ValidationFailed, reason.clone()),
            )?;
        }
        job_repo::set_totals(&self.db, &job.id, admitted.len() as u64, rejected.len() as u64)?;
        info!(
            "Created job {} for folder '{}': {} admitted, {} skipped",
            job.id,
            folder.name,
            admitted.len(),
            rejected.len()
        );

        let job = self.find_job(&job.id)?;
        self.tracker.events().job_status(&job.id, job.status, job.counters);

        if !options.immediate_processing.unwrap_or(config.immediate_processing) {
            info!("Job {} waits in pending until resumed", job.id);
            return Ok(StartedJob::from(&job));
        }

        let modified = files
            .iter()
            .filter_map(|f| f.modified.map(|m| (f.path.clone(), m)))
            .collect();
        self.dispatcher.job_started(&job, &folder.name).await;
        let background = options.background_processing.unwrap_or(config.background_processing);
        let done = self.spawn_run(job.clone(), folder, storage, config, modified)?;
        drop(guard);

        self.finish_start(job, background, done).await
    }

    async fn finish_start(
        &self,
        job: BatchJob,
        background: bool,
        mut done: watch::Receiver<bool>,
    ) -> Result<StartedJob, OrchestratorError> {
        if background {
            let mut started = StartedJob::from(&job);
            started.status = JobStatus::Running;
            return Ok(started);
        }
        // A closed channel means the run task is gone; fall through to the store.
        let _ = done.wait_for(|finished| *finished).await;
        Ok(StartedJob::from(&self.find_job(&job.id)?))
    }

    fn spawn_run(
        &self,
        job: BatchJob,
        folder: ExternalFolderConfig,
        storage: Arc<dyn StorageProvider>,
        config: Arc<GlobalBatchConfig>,
        modified: HashMap<String, chrono::DateTime<Utc>>,
    ) -> Result<watch::Receiver<bool>, OrchestratorError> {
        std::fs::create_dir_all(&self.download_dir).map_err(|e| OrchestratorError::DownloadDirectory {
            path: self.download_dir.clone(),
            source: e,
        })?;

        let control = Arc::new(JobControl::new());
        let (done_tx, done_rx) = watch::channel(false);
        lock_active(&self.active).insert(
            job.id.clone(),
            ActiveJob {
                control: Arc::clone(&control),
                done: done_rx.clone(),
            },
        );

        let job_id = job.id.clone();
        let span = info_span!("batch_job", job_id = %job.id, folder = %folder.name);
        let run = JobRun::new(
            job,
            folder,
            config,
            storage,
            Arc::clone(&self.analyzer),
            Arc::clone(&self.tracker),
            Arc::clone(&self.dispatcher),
            self.db.clone(),
            self.registry.clock(),
            self.download_dir.clone(),
            control,
        )
        .with_modified_times(modified);

        let active = Arc::clone(&self.active);
        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(
            async move {
                if let Err(e) = run_job(Arc::new(run)).await {
                    error!("Job {} stopped before finishing: {}", job_id, e);
                    dispatcher
                        .system_alert(
                            "Batch job stopped unexpectedly",
                            &format!("Job {} stopped before finishing: {}", job_id, e),
                            json!({"jobId": job_id, "error": e.to_string()}),
                        )
                        .await;
                }
                lock_active(&active).remove(&job_id);
                let _ = done_tx.send(true);
            }
            .instrument(span),
        );
        Ok(done_rx)
    }

    /// Cooperative cancel. Queued work is skipped and in-flight records
    /// finish first; a job nobody is running is finalized right away.
    pub async fn stop_batch_processing(&self, job_id: &str) -> Result<BatchJob, OrchestratorError> {
        let job = self.find_job(job_id)?;
        if job.status.is_terminal() {
            return Err(OrchestratorError::JobNotActive(job_id.to_string()));
        }

        let control = lock_active(&self.active).get(job_id).map(|a| Arc::clone(&a.control));
        match control {
            Some(control) => {
                if !job_repo::request_cancel(&self.db, job_id)? {
                    // Finalized or already cancelling since the read above.
                    let job = self.find_job(job_id)?;
                    return match job.status {
                        JobStatus::Cancelling => Ok(job),
                        _ => Err(OrchestratorError::JobNotActive(job_id.to_string())),
                    };
                }
                control.cancel();
                info!("Cancellation requested for job {}", job_id);
                let job = self.find_job(job_id)?;
                self.tracker.events().job_status(&job.id, job.status, job.counters);
                Ok(job)
            }
            None => self.cancel_idle_job(job).await,
        }
    }

    /// Cancels a job without a running task (pending, or left over from
    /// a previous process).
    pub(crate) async fn cancel_idle_job(&self, job: BatchJob) -> Result<BatchJob, OrchestratorError> {
        let pending = record_repo::list_for_job(
            &self.db,
            &job.id,
            &[FileStatus::Discovered, FileStatus::Queued, FileStatus::Retrying],
        )?;
        let mut cancelled = 0;
        for record in pending {
            if self.tracker.cancel(&record.id).is_ok() {
                cancelled += 1;
            }
        }
        job_repo::increment(&self.db, &job.id, JobCounter::Cancelled, cancelled)?;
        let summary = record_repo::error_summary(&self.db, &job.id)?;
        job_repo::finish(&self.db, &job.id, JobStatus::Cancelled, &summary, Utc::now())?;

        let job = self.find_job(&job.id)?;
        info!("Job {} cancelled ({} records skipped)", job.id, cancelled);
        self.tracker.events().job_status(&job.id, job.status, job.counters);
        let folder_name = folder_repo::find_by_id(&self.db, &job.folder_id)?
            .map(|f| f.name)
            .unwrap_or_else(|| job.folder_id.clone());
        self.dispatcher.job_finished(&job, &folder_name).await;
        Ok(job)
    }

    pub fn get_active_batch_jobs(&self) -> Result<Vec<String>, OrchestratorError> {
        Ok(job_repo::list_active(&self.db)?.into_iter().map(|j| j.id).collect())
    }

    /// Jobs with a live run task in this process.
    pub fn running_job_count(&self) -> usize {
        lock_active(&self.active).len()
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        lock_active(&self.active).contains_key(job_id)
    }

    /// Waits until a running job finishes and returns its final state.
    pub async fn wait_for_job(&self, job_id: &str) -> Result<BatchJob, OrchestratorError> {
        let done = lock_active(&self.active).get(job_id).map(|a| a.done.clone());
        if let Some(mut done) = done {
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.find_job(job_id)
    }

    /// Runs a pending job, or a running job whose task did not survive a
    /// restart, over its existing records.
    pub async fn resume_job(&self, job_id: &str) -> Result<StartedJob, OrchestratorError> {
        let guard = self.start_lock.lock().await;
        let job = self.find_job(job_id)?;
        if self.is_running(job_id) {
            return Err(OrchestratorError::InvalidJobState {
                job_id: job_id.to_string(),
                status: job.status.to_string(),
                action: "resumed while it is running",
            });
        }
        if !matches!(job.status, JobStatus::Pending | JobStatus::Running) {
            return Err(OrchestratorError::InvalidJobState {
                job_id: job_id.to_string(),
                status: job.status.to_string(),
                action: "resumed",
            });
        }
        drop(guard);
        self.restart(job).await
    }

    async fn restart(&self, job: BatchJob) -> Result<StartedJob, OrchestratorError> {
        let folder = folder_repo::find_by_id(&self.db, &job.folder_id)?
            .ok_or_else(|| OrchestratorError::FolderNotFound(job.folder_id.clone()))?;
        let storage = self.open_storage(&folder).await?;
        let config = self.batch_config.snapshot();
        let background = job
            .options
            .background_processing
            .unwrap_or(config.background_processing);

        let guard = self.start_lock.lock().await;
        if job.status == JobStatus::Pending {
            self.dispatcher.job_started(&job, &folder.name).await;
        }
        info!("Resuming job {} for folder '{}'", job.id, folder.name);
        let done = self.spawn_run(job.clone(), folder, storage, config, HashMap::new())?;
        drop(guard);
        self.finish_start(job, background, done).await
    }

    /// Requeues every failed record of a finished job and runs it again.
    pub async fn retry_failed_files(&self, job_id: &str) -> Result<StartedJob, OrchestratorError> {
        let job = self.reopenable_job(job_id)?;
        let failed = record_repo::list_for_job(&self.db, job_id, &[FileStatus::Failed])?;
        if failed.is_empty() {
            return Ok(StartedJob::from(&job));
        }
        for record in &failed {
            self.tracker.retry(&record.id)?;
        }
        job_repo::increment(&self.db, job_id, JobCounter::Failed, -(failed.len() as i64))?;
        info!("Retrying {} failed records of job {}", failed.len(), job_id);
        self.reopen(job_id).await
    }

    /// Requeues one failed record and runs its job again.
    pub async fn retry_file(&self, record_id: &str) -> Result<FileProcessingRecord, OrchestratorError> {
        let record = self.tracker.get_record(record_id)?;
        self.reopenable_job(&record.batch_job_id)?;
        let record = self.tracker.retry(record_id)?;
        job_repo::increment(&self.db, &record.batch_job_id, JobCounter::Failed, -1)?;
        self.reopen(&record.batch_job_id).await?;
        Ok(record)
    }

    fn reopenable_job(&self, job_id: &str) -> Result<BatchJob, OrchestratorError> {
        let job = self.find_job(job_id)?;
        if !matches!(job.status, JobStatus::Completed | JobStatus::Failed) {
            return Err(OrchestratorError::InvalidJobState {
                job_id: job_id.to_string(),
                status: job.status.to_string(),
                action: "retried",
            });
        }
        self.ensure_no_active_job(&job.folder_id)?;
        Ok(job)
    }

    async fn reopen(&self, job_id: &str) -> Result<StartedJob, OrchestratorError> {
        job_repo::mark_running(&self.db, job_id, Utc::now())?;
        let job = self.find_job(job_id)?;
        self.restart(job).await
    }
}

fn validate_options(options: &JobOptions) -> Result<(), OrchestratorError> {
    if let Some(name) = &options.name {
        if name.trim().is_empty() {
            return Err(OrchestratorError::InvalidOptions("name must not be empty".to_string()));
        }
    }
    Ok(())
}
