//! Timer-driven monitor that rescans a storage path on a fixed interval.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{info_span, Instrument};

use super::filter::NameFilter;
use super::{MonitorHandle, MonitorProvider, MonitorStatus, ScanCallback};
use crate::providers::clock::Clock;
use crate::providers::error::MonitorError;
use crate::providers::storage::{RemoteFile, StorageProvider};
use crate::providers::{require_object, ProviderTestResult, ValidationResult};
use crate::sanitize::redact_path;

pub const MIN_INTERVAL_SECONDS: u64 = 30;
pub const MAX_INTERVAL_SECONDS: u64 = 3600;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollingConfig {
    #[serde(default)]
    path: String,
    #[serde(default = "default_interval")]
    interval_seconds: u64,
    #[serde(default)]
    file_patterns: Vec<String>,
    #[serde(default)]
    exclude_patterns: Vec<String>,
}

fn default_interval() -> u64 {
    300
}

struct RunningMonitor {
    status: Arc<Mutex<MonitorStatus>>,
    task: JoinHandle<()>,
}

/// Scans through the storage provider it was built with. Without one it can
/// be configured and validated but not scan.
pub struct PollingMonitorProvider {
    storage: Option<Arc<dyn StorageProvider>>,
    clock: Arc<dyn Clock>,
    configured: Option<Value>,
    monitors: Mutex<HashMap<MonitorHandle, RunningMonitor>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("Monitor lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

async fn scan(
    storage: &dyn StorageProvider,
    config: &PollingConfig,
    filter: &NameFilter,
) -> Result<Vec<RemoteFile>, MonitorError> {
    let files = storage.list_files(&config.path).await?;
    Ok(files
        .into_iter()
        .filter(|f| filter.accepts(&f.name, &f.path))
        .collect())
}

/// Folds one scan outcome into the status. Returns the files on success.
fn record_scan(
    status: &Mutex<MonitorStatus>,
    clock: &dyn Clock,
    result: Result<Vec<RemoteFile>, MonitorError>,
) -> Option<Vec<RemoteFile>> {
    let mut status = lock(status);
    status.last_scan = Some(clock.now());
    status.scan_count += 1;
    match result {
        Ok(files) => {
            status.last_file_count = files.len();
            status.last_error = None;
            Some(files)
        }
        Err(e) => {
            warn!("Scan failed: {}", e);
            status.last_error = Some(e.to_string());
            None
        }
    }
}

impl PollingMonitorProvider {
    pub fn new(storage: Option<Arc<dyn StorageProvider>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            configured: None,
            monitors: Mutex::new(HashMap::new()),
        }
    }

    fn parse(&self, config: &Value) -> Result<(PollingConfig, NameFilter), MonitorError> {
        let config = match (config, &self.configured) {
            (Value::Null, Some(configured)) => configured,
            _ => config,
        };
        let validation = self.validate_config(config);
        if !validation.valid {
            return Err(MonitorError::InvalidConfig(validation.errors));
        }
        let parsed: PollingConfig = serde_json::from_value(config.clone())
            .map_err(|e| MonitorError::InvalidConfig(vec![e.to_string()]))?;
        let filter = NameFilter::new(&parsed.file_patterns, &parsed.exclude_patterns)
            .map_err(MonitorError::InvalidConfig)?;
        Ok((parsed, filter))
    }

    fn storage(&self) -> Result<&Arc<dyn StorageProvider>, MonitorError> {
        self.storage.as_ref().ok_or(MonitorError::NotConfigured)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.monitors).len()
    }
}

fn check_string_list(config: &Value, key: &str, errors: &mut Vec<String>) {
    match config.get(key) {
        None => {}
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => {
            let raw: Vec<String> = items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            if let Err(pattern_errors) = NameFilter::new(&raw, &[]) {
                errors.extend(pattern_errors);
            }
        }
        Some(_) => errors.push(format!("{} must be a list of strings", key)),
    }
}

#[async_trait]
impl MonitorProvider for PollingMonitorProvider {
    fn provider_type(&self) -> &'static str {
        "polling"
    }

    fn validate_config(&self, config: &Value) -> ValidationResult {
        let mut errors = Vec::new();
        if require_object(config, &mut errors) {
            if config.get("path").is_some_and(|v| !v.is_string()) {
                errors.push("path must be a string".to_string());
            }
            if let Some(v) = config.get("intervalSeconds") {
                match v.as_u64() {
                    Some(n) if (MIN_INTERVAL_SECONDS..=MAX_INTERVAL_SECONDS).contains(&n) => {}
                    _ => errors.push(format!(
                        "intervalSeconds must be between {} and {}",
                        MIN_INTERVAL_SECONDS, MAX_INTERVAL_SECONDS
                    )),
                }
            }
            check_string_list(config, "filePatterns", &mut errors);
            check_string_list(config, "excludePatterns", &mut errors);
        }
        ValidationResult::from_errors(errors)
    }

    async fn configure(&mut self, config: &Value) -> Result<(), MonitorError> {
        self.parse(config)?;
        self.configured = Some(config.clone());
        Ok(())
    }

    async fn start_monitoring(
        &self,
        config: &Value,
        callback: Option<ScanCallback>,
    ) -> Result<MonitorHandle, MonitorError> {
        let (config, filter) = self.parse(config)?;
        let storage = Arc::clone(self.storage()?);
        let handle = MonitorHandle::new();
        let status = Arc::new(Mutex::new(MonitorStatus {
            is_active: true,
            ..Default::default()
        }));

        // Initial snapshot, before the first tick.
        let initial = scan(storage.as_ref(), &config, &filter)
            .instrument(info_span!("scan_cycle", monitor = %handle, initial = true))
            .await?;
        if let (Some(files), Some(cb)) = (record_scan(&status, self.clock.as_ref(), Ok(initial)), &callback) {
            cb(files);
        }

        let interval = Duration::from_secs(config.interval_seconds);
        let clock = Arc::clone(&self.clock);
        let task_status = Arc::clone(&status);
        let task_handle = handle.clone();
        let task = tokio::spawn(async move {
            loop {
                clock.sleep(interval).await;
                let result = scan(storage.as_ref(), &config, &filter)
                    .instrument(info_span!("scan_cycle", monitor = %task_handle))
                    .await;
                if let (Some(files), Some(cb)) = (record_scan(&task_status, clock.as_ref(), result), &callback) {
                    cb(files);
                }
            }
        });

        info!(
            "Polling monitor {} started (every {}s)",
            handle,
            interval.as_secs()
        );
        lock(&self.monitors).insert(handle.clone(), RunningMonitor { status, task });
        Ok(handle)
    }

    async fn stop_monitoring(&self, handle: &MonitorHandle) -> bool {
        let Some(running) = lock(&self.monitors).remove(handle) else {
            return false;
        };
        running.task.abort();
        lock(&running.status).is_active = false;
        info!("Polling monitor {} stopped", handle);
        true
    }

    async fn scan_for_files(&self, config: &Value) -> Result<Vec<RemoteFile>, MonitorError> {
        let (config, filter) = self.parse(config)?;
        scan(self.storage()?.as_ref(), &config, &filter)
            .instrument(info_span!("scan_cycle", path = %redact_path(Path::new(&config.path))))
            .await
    }

    fn get_status(&self, handle: &MonitorHandle) -> Result<MonitorStatus, MonitorError> {
        lock(&self.monitors)
            .get(handle)
            .map(|m| lock(&m.status).clone())
            .ok_or_else(|| MonitorError::HandleNotFound(handle.to_string()))
    }

    async fn test_monitoring(&self, config: &Value) -> ProviderTestResult {
        let (parsed, filter) = match self.parse(config) {
            Ok(p) => p,
            Err(e) => return ProviderTestResult::failure(e.to_string(), Value::Null),
        };
        let storage = match self.storage() {
            Ok(s) => s,
            Err(e) => return ProviderTestResult::failure(e.to_string(), Value::Null),
        };
        match scan(storage.as_ref(), &parsed, &filter).await {
            Ok(files) => ProviderTestResult::success(
                format!("Scan found {} matching files", files.len()),
                json!({
                    "fileCount": files.len(),
                    "intervalSeconds": parsed.interval_seconds,
                    "path": parsed.path,
                }),
            ),
            Err(e) => ProviderTestResult::failure(e.to_string(), json!({"path": parsed.path})),
        }
    }

    async fn stop_all(&self) {
        let drained: Vec<_> = lock(&self.monitors).drain().collect();
        for (handle, running) in drained {
            running.task.abort();
            lock(&running.status).is_active = false;
            info!("Polling monitor {} stopped", handle);
        }
    }
}

impl Drop for PollingMonitorProvider {
    fn drop(&mut self) {
        for running in lock(&self.monitors).values() {
            running.task.abort();
        }
    }
}
