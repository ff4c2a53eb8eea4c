//! Management façade consumed by a CLI or UI: folder and notification
//! profiles, jobs, records, statistics and system status.

use std::path::PathBuf;
use std::sync::Arc;

use log::info;
use serde::Serialize;
use serde_json::json;

use crate::config::batch::{load_from_store, save_to_store};
use crate::config::{
    BatchConfigHandle, ExternalFolderConfig, FolderUpdate, GlobalBatchConfig, NewFolder, NewNotification,
    NotificationConfig, NotificationUpdate, Settings,
};
use crate::db::job_repo::{self, JobFilter};
use crate::db::log_repo::ProcessingLogEntry;
use crate::db::{folder_repo, notification_repo, Database};
use crate::dispatch::NotificationDispatcher;
use crate::error::{AudiobatchError, ConfigError, OrchestratorError, Result};
use crate::events::BatchEventBroadcaster;
use crate::orchestrator::{
    reconcile_on_startup, Analyzer, BatchJob, BatchOrchestrator, HttpAnalyzer, JobOptions, ReconcileReport,
    ScannedFile, StartedJob,
};
use crate::providers::{ProviderCategory, ProviderError, ProviderRegistry, ProviderTestResult};
use crate::supervisor::MonitorSupervisor;
use crate::tracker::{
    ErrorCodeDescription, FileProcessingRecord, FileStatusTracker, Pagination, ProcessingStats, RecordFilter,
    RecordPage, RecordSort, StatusDescription,
};

/// Outcome of testing a folder profile without processing anything.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderTestResult {
    pub storage: ProviderTestResult,
    pub monitor: ProviderTestResult,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub active_jobs: usize,
    pub running_jobs: usize,
    pub monitored_folders: usize,
    pub batch_config: GlobalBatchConfig,
}

pub struct BatchService {
    db: Database,
    registry: Arc<ProviderRegistry>,
    orchestrator: Arc<BatchOrchestrator>,
    supervisor: Arc<MonitorSupervisor>,
}

impl BatchService {
    /// Wires every component over an open store.
    pub fn new(
        db: Database,
        registry: Arc<ProviderRegistry>,
        analyzer: Arc<dyn Analyzer>,
        events: BatchEventBroadcaster,
        download_dir: PathBuf,
    ) -> Result<Self> {
        let batch_config = BatchConfigHandle::new(load_from_store(&db)?.unwrap_or_default())?;
        let tracker = Arc::new(FileStatusTracker::new(db.clone(), events));
        let dispatcher = Arc::new(NotificationDispatcher::new(db.clone(), Arc::clone(&registry)));
        let orchestrator = Arc::new(BatchOrchestrator::new(
            db.clone(),
            Arc::clone(&registry),
            tracker,
            analyzer,
            dispatcher,
            batch_config.clone(),
            download_dir,
        ));
        let supervisor = Arc::new(MonitorSupervisor::new(
            db.clone(),
            Arc::clone(&registry),
            Arc::clone(&orchestrator),
            batch_config,
        ));
        Ok(Self {
            db,
            registry,
            orchestrator,
            supervisor,
        })
    }

    /// Opens the store named by the settings, applies seed data and builds
    /// the service with the default providers and the HTTP analyzer.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let path = settings.database_path().ok_or_else(|| ConfigError::Validation {
            message: "no database_path set and no home directory to default to".to_string(),
        })?;
        let db = Database::open(&path)?;
        seed_store(&db, settings)?;

        let analyzer = HttpAnalyzer::new(&settings.analysis).map_err(|e| ConfigError::Validation {
            message: format!("analysis client: {}", e),
        })?;
        Self::new(
            db,
            Arc::new(ProviderRegistry::with_defaults()),
            Arc::new(analyzer),
            BatchEventBroadcaster::default(),
            settings.download_directory.clone(),
        )
    }

    pub fn orchestrator(&self) -> &Arc<BatchOrchestrator> {
        &self.orchestrator
    }

    pub fn supervisor(&self) -> &Arc<MonitorSupervisor> {
        &self.supervisor
    }

    pub fn events(&self) -> &BatchEventBroadcaster {
        self.orchestrator.tracker().events()
    }

    fn tracker(&self) -> &FileStatusTracker {
        self.orchestrator.tracker()
    }

    /// Repairs state from an earlier process and resumes its running jobs.
    pub async fn recover(&self) -> Result<ReconcileReport> {
        let report = reconcile_on_startup(&self.db, self.tracker())?;
        if report.requeued > 0 || !report.cancelled_jobs.is_empty() {
            self.orchestrator
                .dispatcher()
                .system_alert(
                    "Interrupted work recovered",
                    &format!(
                        "{} records requeued, {} cancelling jobs finalized, {} jobs resumed after restart",
                        report.requeued,
                        report.cancelled_jobs.len(),
                        report.jobs_to_resume.len()
                    ),
                    json!({
                        "requeued": report.requeued,
                        "cancelledJobs": report.cancelled_jobs,
                        "resumedJobs": report.jobs_to_resume,
                    }),
                )
                .await;
        }
        for job_id in &report.jobs_to_resume {
            if let Err(e) = self.orchestrator.resume_job(job_id).await {
                log::warn!("Could not resume job {}: {}", job_id, e);
            }
        }
        Ok(report)
    }

    // Folders

    pub fn list_folders(&self) -> Result<Vec<ExternalFolderConfig>> {
        Ok(folder_repo::list(&self.db, false)?)
    }

    pub fn get_folder(&self, id: &str) -> Result<ExternalFolderConfig> {
        folder_repo::find_by_id(&self.db, id)?
            .ok_or_else(|| OrchestratorError::FolderNotFound(id.to_string()).into())
    }

    /// Checks both provider configs against the registry. No connection is
    /// attempted.
    fn validate_folder(&self, folder: &ExternalFolderConfig) -> Result<()> {
        for (category, provider) in [
            (ProviderCategory::Storage, &folder.storage_config),
            (ProviderCategory::Monitor, &folder.monitor_config),
        ] {
            let result = self
                .registry
                .validate_config(category, &provider.provider_type, &provider.config)?;
            if !result.valid {
                return Err(ProviderError::InvalidConfig {
                    provider_type: provider.provider_type.clone(),
                    errors: result.errors,
                }
                .into());
            }
        }
        Ok(())
    }

    pub async fn create_folder(&self, new: NewFolder) -> Result<ExternalFolderConfig> {
        if new.name.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "folder name must not be empty".to_string(),
            }
            .into());
        }
        let folder = new.into_config();
        self.validate_folder(&folder)?;
        folder_repo::insert(&self.db, &folder)?;
        info!("Created folder '{}' ({})", folder.name, folder.id);
        self.supervisor.refresh_folder(&folder.id).await?;
        Ok(folder)
    }

    pub async fn update_folder(&self, id: &str, update: FolderUpdate) -> Result<ExternalFolderConfig> {
        let mut folder = self.get_folder(id)?;
        update.apply_to(&mut folder);
        self.validate_folder(&folder)?;
        folder_repo::update(&self.db, &folder)?;
        self.supervisor.refresh_folder(id).await?;
        Ok(folder)
    }

    pub async fn set_folder_active(&self, id: &str, active: bool) -> Result<ExternalFolderConfig> {
        self.update_folder(
            id,
            FolderUpdate {
                is_active: Some(active),
                ..Default::default()
            },
        )
        .await
    }

    /// Refused while the folder has an active job.
    pub async fn delete_folder(&self, id: &str) -> Result<bool> {
        if let Some(job) = job_repo::find_active_for_folder(&self.db, id)? {
            return Err(OrchestratorError::JobAlreadyActive {
                folder_id: id.to_string(),
                job_id: job.id,
            }
            .into());
        }
        self.supervisor.stop_folder(id).await;
        Ok(folder_repo::delete(&self.db, id)?)
    }

    /// Storage connectivity plus a real scan through the monitor. No job
    /// or record is created.
    pub async fn test_folder(&self, id: &str) -> Result<FolderTestResult> {
        let folder = self.get_folder(id)?;
        let storage_cfg = &folder.storage_config;
        let monitor_cfg = &folder.monitor_config;

        let storage = self
            .registry
            .test_provider(ProviderCategory::Storage, &storage_cfg.provider_type, &storage_cfg.config)
            .await;
        let monitor = match self
            .registry
            .create_storage(&storage_cfg.provider_type, &storage_cfg.config)
            .await
        {
            Ok(provider) => {
                self.registry
                    .test_monitor(&monitor_cfg.provider_type, &monitor_cfg.config, Arc::from(provider))
                    .await
            }
            Err(e) => ProviderTestResult::failure(
                format!("monitor not tested: {}", e),
                json!({"stage": "storage"}),
            ),
        };
        Ok(FolderTestResult { storage, monitor })
    }

    pub async fn trigger_scan(&self, folder_id: &str) -> Result<Vec<ScannedFile>> {
        Ok(self.orchestrator.preview_scan(folder_id).await?)
    }

    // Notifications

    pub fn list_notifications(&self) -> Result<Vec<NotificationConfig>> {
        Ok(notification_repo::list(&self.db, false)?)
    }

    pub fn get_notification(&self, id: &str) -> Result<NotificationConfig> {
        notification_repo::find_by_id(&self.db, id)?.ok_or_else(|| AudiobatchError::NotificationNotFound(id.to_string()))
    }

    fn validate_notification(&self, notification: &NotificationConfig) -> Result<()> {
        let result = self.registry.validate_config(
            ProviderCategory::Notification,
            &notification.notification_type,
            &notification.config,
        )?;
        if !result.valid {
            return Err(ProviderError::InvalidConfig {
                provider_type: notification.notification_type.clone(),
                errors: result.errors,
            }
            .into());
        }
        Ok(())
    }

    pub fn create_notification(&self, new: NewNotification) -> Result<NotificationConfig> {
        let notification = new.into_config();
        self.validate_notification(&notification)?;
        notification_repo::insert(&self.db, &notification)?;
        info!("Created {} notification '{}'", notification.notification_type, notification.name);
        Ok(notification)
    }

    pub fn update_notification(&self, id: &str, update: NotificationUpdate) -> Result<NotificationConfig> {
        let mut notification = self.get_notification(id)?;
        update.apply_to(&mut notification);
        self.validate_notification(&notification)?;
        notification_repo::update(&self.db, &notification)?;
        Ok(notification)
    }

    pub fn delete_notification(&self, id: &str) -> Result<bool> {
        Ok(notification_repo::delete(&self.db, id)?)
    }

    /// Sends the channel's test message.
    pub async fn test_notification(&self, id: &str) -> Result<ProviderTestResult> {
        let notification = self.get_notification(id)?;
        Ok(self
            .registry
            .test_notification(&notification.notification_type, &notification.config)
            .await)
    }

    // Jobs

    pub async fn start_job(&self, folder_id: &str, options: JobOptions) -> Result<StartedJob> {
        Ok(self.orchestrator.start_batch_processing(folder_id, options).await?)
    }

    pub async fn cancel_job(&self, job_id: &str) -> Result<BatchJob> {
        Ok(self.orchestrator.stop_batch_processing(job_id).await?)
    }

    pub async fn resume_job(&self, job_id: &str) -> Result<StartedJob> {
        Ok(self.orchestrator.resume_job(job_id).await?)
    }

    pub async fn retry_failed_files(&self, job_id: &str) -> Result<StartedJob> {
        Ok(self.orchestrator.retry_failed_files(job_id).await?)
    }

    pub async fn retry_file(&self, record_id: &str) -> Result<FileProcessingRecord> {
        Ok(self.orchestrator.retry_file(record_id).await?)
    }

    pub fn get_job(&self, job_id: &str) -> Result<BatchJob> {
        job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()).into())
    }

    pub fn list_jobs(&self, filter: &JobFilter) -> Result<(Vec<BatchJob>, u64)> {
        Ok(job_repo::query(&self.db, filter)?)
    }

    pub fn active_jobs(&self) -> Result<Vec<String>> {
        Ok(self.orchestrator.get_active_batch_jobs()?)
    }

    // Records

    pub fn list_records(&self, filter: &RecordFilter, page: Pagination, sort: RecordSort) -> Result<RecordPage> {
        Ok(self.tracker().list_records(filter, page, sort)?)
    }

    pub fn get_record(&self, record_id: &str) -> Result<FileProcessingRecord> {
        Ok(self.tracker().get_record(record_id)?)
    }

    pub fn get_file_processing_logs(&self, record_id: &str) -> Result<Vec<ProcessingLogEntry>> {
        Ok(self.tracker().get_processing_logs(record_id)?)
    }

    pub fn error_code_descriptions(&self) -> Vec<ErrorCodeDescription> {
        self.tracker().get_error_code_descriptions()
    }

    pub fn status_descriptions(&self) -> Vec<StatusDescription> {
        self.tracker().get_status_descriptions()
    }

    pub fn processing_stats(&self, filter: &RecordFilter) -> Result<ProcessingStats> {
        Ok(self.tracker().get_processing_stats(filter)?)
    }

    // System

    pub async fn system_status(&self) -> Result<SystemStatus> {
        Ok(SystemStatus {
            active_jobs: self.orchestrator.get_active_batch_jobs()?.len(),
            running_jobs: self.orchestrator.running_job_count(),
            monitored_folders: self.supervisor.monitored_folders().await.len(),
            batch_config: GlobalBatchConfig::clone(&self.orchestrator.batch_config().snapshot()),
        })
    }

    /// Persists and hot-reloads. Running jobs keep their snapshot.
    pub fn update_batch_config(&self, config: GlobalBatchConfig) -> Result<()> {
        save_to_store(&self.db, &config)?;
        self.orchestrator.batch_config().reload(config)?;
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.supervisor.stop_all().await;
    }
}

/// Applies seed profiles from the settings when the store has none.
pub fn seed_store(db: &Database, settings: &Settings) -> Result<()> {
    if folder_repo::count(db)? == 0 {
        for folder in &settings.folders {
            folder_repo::insert(db, &folder.clone().into_config())?;
        }
        if !settings.folders.is_empty() {
            info!("Seeded {} folders from settings", settings.folders.len());
        }
    }
    if notification_repo::count(db)? == 0 {
        for notification in &settings.notifications {
            notification_repo::insert(db, &notification.clone().into_config())?;
        }
    }
    if let Some(batch) = &settings.batch {
        if load_from_store(db)?.is_none() {
            save_to_store(db, batch)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_settings_from_str, ProcessingConfig, ProviderConfig};
    use crate::orchestrator::{AnalysisError, AnalysisOutcome, FileMetadata, JobStatus};
    use crate::tracker::FileStatus;
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::TempDir;

    struct EchoAnalyzer;

    #[async_trait]
    impl Analyzer for EchoAnalyzer {
        async fn analyze(&self, _local_path: &Path, metadata: &FileMetadata) -> std::result::Result<AnalysisOutcome, AnalysisError> {
            Ok(AnalysisOutcome {
                result_ref: format!("analysis/{}", metadata.file_name),
            })
        }
    }

    struct Fixture {
        service: BatchService,
        db: Database,
        source: TempDir,
        _downloads: TempDir,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let source = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        let service = BatchService::new(
            db.clone(),
            Arc::new(ProviderRegistry::with_defaults()),
            Arc::new(EchoAnalyzer),
            BatchEventBroadcaster::default(),
            downloads.path().to_path_buf(),
        )
        .unwrap();
        Fixture {
            service,
            db,
            source,
            _downloads: downloads,
        }
    }

    fn local_folder(base: &Path) -> NewFolder {
        NewFolder {
            name: "Recordings".to_string(),
            storage_config: ProviderConfig::new("local", json!({"basePath": base})),
            monitor_config: ProviderConfig::new("polling", json!({"intervalSeconds": 60})),
            processing_config: ProcessingConfig {
                max_file_size: None,
                allowed_extensions: vec!["mp3".to_string()],
                auto_start: false,
            },
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_create_folder_rejects_invalid_storage_config() {
        let f = fixture();
        let mut folder = local_folder(f.source.path());
        folder.storage_config = ProviderConfig::new("local", json!({}));

        let err = f.service.create_folder(folder).await.unwrap_err();
        match err {
            AudiobatchError::Provider(ProviderError::InvalidConfig { provider_type, errors }) => {
                assert_eq!(provider_type, "local");
                assert!(errors.iter().any(|e| e.contains("basePath")));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(f.service.list_folders().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_folder_rejects_unknown_provider_type() {
        let f = fixture();
        let mut folder = local_folder(f.source.path());
        folder.monitor_config = ProviderConfig::new("inotify", json!({}));

        assert!(f.service.create_folder(folder).await.is_err());
        assert_eq!(folder_repo::count(&f.db).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_folder_crud() {
        let f = fixture();
        let created = f.service.create_folder(local_folder(f.source.path())).await.unwrap();
        assert_eq!(f.service.get_folder(&created.id).unwrap().name, "Recordings");

        let renamed = f
            .service
            .update_folder(
                &created.id,
                FolderUpdate {
                    name: Some("Field recordings".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "Field recordings");

        let inactive = f.service.set_folder_active(&created.id, false).await.unwrap();
        assert!(!inactive.is_active);

        assert!(f.service.delete_folder(&created.id).await.unwrap());
        assert!(matches!(
            f.service.get_folder(&created.id),
            Err(AudiobatchError::Orchestrator(OrchestratorError::FolderNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_foreground_job_processes_admitted_files() {
        let f = fixture();
        std::fs::write(f.source.path().join("a.mp3"), b"aaaa").unwrap();
        std::fs::write(f.source.path().join("b.mp3"), b"bbbb").unwrap();
        std::fs::write(f.source.path().join("notes.txt"), b"skip").unwrap();
        let folder = f.service.create_folder(local_folder(f.source.path())).await.unwrap();

        let options = JobOptions {
            background_processing: Some(false),
            ..Default::default()
        };
        let started = f.service.start_job(&folder.id, options).await.unwrap();
        assert_eq!(started.status, JobStatus::Completed);
        assert_eq!(started.total_files, 2);
        assert_eq!(started.skipped_files, 1);

        let job = f.service.get_job(&started.job_id).unwrap();
        assert_eq!(job.counters.processed_files, 2);
        assert_eq!(job.counters.failed_files, 0);

        let filter = RecordFilter {
            batch_job_id: Some(started.job_id.clone()),
            ..Default::default()
        };
        let page = f
            .service
            .list_records(&filter, Pagination::default(), RecordSort::default())
            .unwrap();
        assert_eq!(page.total, 3);
        let skipped: Vec<_> = page.records.iter().filter(|r| r.status == FileStatus::Skipped).collect();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].file_name, "notes.txt");

        let completed = page
            .records
            .iter()
            .find(|r| r.file_name == "a.mp3")
            .unwrap();
        assert_eq!(completed.result_ref.as_deref(), Some("analysis/a.mp3"));
        let logs = f.service.get_file_processing_logs(&completed.id).unwrap();
        assert!(logs.len() >= 4);

        let stats = f.service.processing_stats(&filter).unwrap();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.skipped, 1);
    }

    #[tokio::test]
    async fn test_delete_folder_refused_while_job_active() {
        let f = fixture();
        std::fs::write(f.source.path().join("a.mp3"), b"aaaa").unwrap();
        let folder = f.service.create_folder(local_folder(f.source.path())).await.unwrap();

        let options = JobOptions {
            immediate_processing: Some(false),
            ..Default::default()
        };
        let started = f.service.start_job(&folder.id, options).await.unwrap();
        assert_eq!(started.status, JobStatus::Pending);

        let err = f.service.delete_folder(&folder.id).await.unwrap_err();
        assert!(matches!(
            err,
            AudiobatchError::Orchestrator(OrchestratorError::JobAlreadyActive { .. })
        ));

        let cancelled = f.service.cancel_job(&started.job_id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(f.service.delete_folder(&folder.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_trigger_scan_creates_nothing() {
        let f = fixture();
        std::fs::write(f.source.path().join("a.mp3"), b"aaaa").unwrap();
        std::fs::write(f.source.path().join("b.wav"), b"bbbb").unwrap();
        let folder = f.service.create_folder(local_folder(f.source.path())).await.unwrap();

        let scanned = f.service.trigger_scan(&folder.id).await.unwrap();
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned.iter().filter(|s| s.admission.is_admitted()).count(), 1);
        let (jobs, total) = f.service.list_jobs(&JobFilter::default()).unwrap();
        assert!(jobs.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_folder_test_reports_storage_and_monitor() {
        let f = fixture();
        std::fs::write(f.source.path().join("a.mp3"), b"aaaa").unwrap();
        let folder = f.service.create_folder(local_folder(f.source.path())).await.unwrap();

        let result = f.service.test_folder(&folder.id).await.unwrap();
        assert!(result.storage.success, "{:?}", result.storage.message);
        assert!(result.monitor.success, "{:?}", result.monitor.message);
    }

    #[tokio::test]
    async fn test_notification_lookup_errors() {
        let f = fixture();
        assert!(matches!(
            f.service.test_notification("missing").await,
            Err(AudiobatchError::NotificationNotFound(_))
        ));
        assert!(!f.service.delete_notification("missing").unwrap());
    }

    #[tokio::test]
    async fn test_create_notification_validates_config() {
        let f = fixture();
        let webhook = NewNotification {
            notification_type: "webhook".to_string(),
            name: "Hook".to_string(),
            config: json!({}),
            conditions: vec![],
            is_active: true,
        };
        assert!(f.service.create_notification(webhook).is_err());
        assert!(f.service.list_notifications().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_batch_config_persists_and_reloads() {
        let f = fixture();
        let mut config = GlobalBatchConfig::default();
        config.max_concurrent_files = 7;
        f.service.update_batch_config(config.clone()).unwrap();

        let status = f.service.system_status().await.unwrap();
        assert_eq!(status.batch_config.max_concurrent_files, 7);
        assert_eq!(status.active_jobs, 0);
        assert_eq!(load_from_store(&f.db).unwrap(), Some(config));
    }

    #[tokio::test]
    async fn test_update_batch_config_rejects_invalid() {
        let f = fixture();
        let mut config = GlobalBatchConfig::default();
        config.max_concurrent_files = 0;
        assert!(f.service.update_batch_config(config).is_err());
        assert!(load_from_store(&f.db).unwrap().is_none());
    }

    #[test]
    fn test_seed_store_only_when_empty() {
        let db = Database::open_in_memory().unwrap();
        let settings = load_settings_from_str(
            r#"
analysis:
  endpoint: http://localhost:9000/analyze
batch:
  maxConcurrentFiles: 4
folders:
  - name: Inbox
    storageConfig:
      type: local
      config:
        basePath: /srv/audio
    monitorConfig:
      type: polling
"#,
        )
        .unwrap();

        seed_store(&db, &settings).unwrap();
        seed_store(&db, &settings).unwrap();

        assert_eq!(folder_repo::count(&db).unwrap(), 1);
        assert_eq!(load_from_store(&db).unwrap().unwrap().max_concurrent_files, 4);
    }
}
