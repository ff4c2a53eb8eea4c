//! Keeps a monitor running for every folder that auto-starts, and turns its
//! scans into batch jobs.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::config::{BatchConfigHandle, ExternalFolderConfig};
use crate::db::{folder_repo, Database};
use crate::error::OrchestratorError;
use crate::orchestrator::{BatchOrchestrator, JobOptions};
use crate::providers::{MonitorHandle, MonitorProvider, MonitorStatus, ProviderRegistry, RemoteFile, ScanCallback};

struct Supervised {
    monitor: Box<dyn MonitorProvider>,
    handle: MonitorHandle,
}

pub struct MonitorSupervisor {
    db: Database,
    registry: Arc<ProviderRegistry>,
    orchestrator: Arc<BatchOrchestrator>,
    batch_config: BatchConfigHandle,
    monitors: Mutex<HashMap<String, Supervised>>,
}

impl MonitorSupervisor {
    pub fn new(
        db: Database,
        registry: Arc<ProviderRegistry>,
        orchestrator: Arc<BatchOrchestrator>,
        batch_config: BatchConfigHandle,
    ) -> Self {
        Self {
            db,
            registry,
            orchestrator,
            batch_config,
            monitors: Mutex::new(HashMap::new()),
        }
    }

    fn should_monitor(&self, folder: &ExternalFolderConfig) -> bool {
        folder.is_active && folder.processing_config.auto_start && self.batch_config.snapshot().auto_start
    }

    /// Starts monitors for every eligible folder. Failures are logged per
    /// folder.
    pub async fn start_all(&self) -> Result<usize, OrchestratorError> {
        let mut started = 0;
        for folder in folder_repo::list(&self.db, true)? {
            if !self.should_monitor(&folder) {
                continue;
            }
            match self.start_folder(&folder).await {
                Ok(_) => started += 1,
                Err(e) => warn!("Cannot monitor folder '{}': {}", folder.name, e),
            }
        }
        info!("Monitoring {} folders", started);
        Ok(started)
    }

    pub async fn start_folder(&self, folder: &ExternalFolderConfig) -> Result<MonitorHandle, OrchestratorError> {
        self.stop_folder(&folder.id).await;

        let storage = self
            .registry
            .create_storage(&folder.storage_config.provider_type, &folder.storage_config.config)
            .await?;
        let monitor = self
            .registry
            .create_monitor(
                &folder.monitor_config.provider_type,
                &folder.monitor_config.config,
                Arc::from(storage),
            )
            .await?;
        let handle = monitor
            .start_monitoring(&folder.monitor_config.config, Some(self.scan_callback(folder)))
            .await?;
        info!("Monitoring folder '{}' ({})", folder.name, handle);

        self.monitors.lock().await.insert(
            folder.id.clone(),
            Supervised {
                monitor,
                handle: handle.clone(),
            },
        );
        Ok(handle)
    }

    fn scan_callback(&self, folder: &ExternalFolderConfig) -> ScanCallback {
        let orchestrator = Arc::clone(&self.orchestrator);
        let folder_id = folder.id.clone();
        Arc::new(move |files: Vec<RemoteFile>| {
            if files.is_empty() {
                return;
            }
            let orchestrator = Arc::clone(&orchestrator);
            let folder_id = folder_id.clone();
            tokio::spawn(async move {
                let options = JobOptions {
                    only_new: true,
                    background_processing: Some(true),
                    ..Default::default()
                };
                match orchestrator.start_batch_with_files(&folder_id, files, options).await {
                    Ok(started) => info!(
                        "Scan of folder {} started job {} ({} files)",
                        folder_id, started.job_id, started.total_files
                    ),
                    Err(OrchestratorError::JobAlreadyActive { job_id, .. }) => {
                        debug!("Scan of folder {} ignored while job {} is active", folder_id, job_id)
                    }
                    Err(OrchestratorError::NoNewFiles(_)) => debug!("Scan of folder {} found nothing new", folder_id),
                    Err(e) => warn!("Scan of folder {} could not start a job: {}", folder_id, e),
                }
            });
        })
    }

    pub async fn stop_folder(&self, folder_id: &str) -> bool {
        let Some(supervised) = self.monitors.lock().await.remove(folder_id) else {
            return false;
        };
        let stopped = supervised.monitor.stop_monitoring(&supervised.handle).await;
        debug!("Stopped monitor {} of folder {}", supervised.handle, folder_id);
        stopped
    }

    /// Restarts or stops a folder's monitor after its config changed.
    pub async fn refresh_folder(&self, folder_id: &str) -> Result<bool, OrchestratorError> {
        match folder_repo::find_by_id(&self.db, folder_id)? {
            Some(folder) if self.should_monitor(&folder) => {
                self.start_folder(&folder).await?;
                Ok(true)
            }
            _ => {
                self.stop_folder(folder_id).await;
                Ok(false)
            }
        }
    }

    pub async fn stop_all(&self) {
        let monitors: Vec<_> = self.monitors.lock().await.drain().collect();
        for (folder_id, supervised) in monitors {
            supervised.monitor.stop_all().await;
            debug!("Stopped monitoring folder {}", folder_id);
        }
    }

    pub async fn monitored_folders(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.monitors.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn status(&self, folder_id: &str) -> Option<MonitorStatus> {
        let monitors = self.monitors.lock().await;
        let supervised = monitors.get(folder_id)?;
        supervised.monitor.get_status(&supervised.handle).ok()
    }
}
