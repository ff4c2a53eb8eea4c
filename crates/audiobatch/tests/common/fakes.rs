//! Scripted providers whose behavior a test controls through a shared handle.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use audiobatch::orchestrator::{AnalysisError, AnalysisOutcome, Analyzer, FileMetadata};
use audiobatch::providers::notification::{Notification, NotificationProvider, SendReceipt};
use audiobatch::providers::storage::DownloadOutcome;
use audiobatch::providers::{
    DownloadError, DownloadErrorKind, NotificationError, ProviderTestResult, RemoteFile, StorageError,
    StorageProvider, ValidationResult,
};

/// Tracks how many records are between download start and analysis end.
#[derive(Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }
}

/// What the scripted storage lists and how its downloads behave.
#[derive(Default)]
pub struct StorageScript {
    files: Mutex<Vec<RemoteFile>>,
    failures: Mutex<HashMap<String, VecDeque<DownloadErrorKind>>>,
    attempts: Mutex<HashMap<String, u32>>,
    disconnected: AtomicBool,
    download_delay: Mutex<Duration>,
    pub gauge: Arc<Gauge>,
}

impl StorageScript {
    pub fn new(gauge: Arc<Gauge>) -> Arc<Self> {
        Arc::new(Self {
            gauge,
            ..Default::default()
        })
    }

    pub fn add_file(&self, name: &str, size: u64) {
        self.files.lock().unwrap().push(RemoteFile {
            name: name.to_string(),
            path: name.to_string(),
            size,
            modified: Some(Utc::now()),
        });
    }

    /// The next downloads of `path` fail with these kinds, in order.
    pub fn fail_next(&self, path: &str, kinds: &[DownloadErrorKind]) {
        self.failures
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .extend(kinds.iter().copied());
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    pub fn set_download_delay(&self, delay: Duration) {
        *self.download_delay.lock().unwrap() = delay;
    }

    pub fn attempts(&self, path: &str) -> u32 {
        self.attempts.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    fn next_failure(&self, path: &str) -> Option<DownloadErrorKind> {
        self.failures.lock().unwrap().get_mut(path).and_then(VecDeque::pop_front)
    }
}

pub struct ScriptedStorage {
    script: Arc<StorageScript>,
}

impl ScriptedStorage {
    pub fn new(script: Arc<StorageScript>) -> Self {
        Self { script }
    }
}

#[async_trait]
impl StorageProvider for ScriptedStorage {
    fn provider_type(&self) -> &'static str {
        "scripted"
    }

    fn validate_config(&self, _config: &Value) -> ValidationResult {
        ValidationResult::ok()
    }

    async fn connect(&mut self, _config: &Value) -> Result<(), StorageError> {
        Ok(())
    }

    async fn list_files(&self, _path: &str) -> Result<Vec<RemoteFile>, StorageError> {
        let mut files = self.script.files.lock().unwrap().clone();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<DownloadOutcome, DownloadError> {
        *self
            .script
            .attempts
            .lock()
            .unwrap()
            .entry(remote_path.to_string())
            .or_insert(0) += 1;
        self.script.gauge.enter();

        let delay = *self.script.download_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failure = if self.script.disconnected.load(Ordering::SeqCst) {
            Some(DownloadErrorKind::Connection)
        } else {
            self.script.next_failure(remote_path)
        };
        if let Some(kind) = failure {
            self.script.gauge.exit();
            return Err(DownloadError::new(kind, remote_path, "scripted failure"));
        }

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::from_io(remote_path, &e))?;
        }
        let body = format!("audio:{}", remote_path);
        tokio::fs::write(local_path, body.as_bytes())
            .await
            .map_err(|e| DownloadError::from_io(remote_path, &e))?;
        Ok(DownloadOutcome {
            size: body.len() as u64,
            downloaded_at: Utc::now(),
        })
    }

    async fn test_connection(&self) -> ProviderTestResult {
        ProviderTestResult::success("scripted storage", Value::Null)
    }

    fn is_reentrant(&self) -> bool {
        true
    }
}

/// Succeeds unless the file name is listed in `reject`. Always leaves the
/// gauge entered by the storage download.
pub struct GaugedAnalyzer {
    pub gauge: Arc<Gauge>,
    pub reject: Mutex<Vec<String>>,
    pub delay: Duration,
}

impl GaugedAnalyzer {
    pub fn new(gauge: Arc<Gauge>, delay: Duration) -> Self {
        Self {
            gauge,
            reject: Mutex::new(Vec::new()),
            delay,
        }
    }
}

#[async_trait]
impl Analyzer for GaugedAnalyzer {
    async fn analyze(&self, _local_path: &Path, metadata: &FileMetadata) -> Result<AnalysisOutcome, AnalysisError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.gauge.exit();
        if self.reject.lock().unwrap().contains(&metadata.file_name) {
            return Err(AnalysisError::UnsupportedFormat(metadata.file_name.clone()));
        }
        Ok(AnalysisOutcome {
            result_ref: format!("analysis/{}", metadata.file_name),
        })
    }
}

pub type Outbox = Arc<Mutex<Vec<Notification>>>;

/// Keeps every notification it is asked to send, after an optional delay.
pub struct RecordingNotifier {
    outbox: Outbox,
    delay: Arc<Mutex<Duration>>,
}

impl RecordingNotifier {
    pub fn new(outbox: Outbox, delay: Arc<Mutex<Duration>>) -> Self {
        Self { outbox, delay }
    }
}

#[async_trait]
impl NotificationProvider for RecordingNotifier {
    fn provider_type(&self) -> &'static str {
        "recording"
    }

    fn validate_config(&self, _config: &Value) -> ValidationResult {
        ValidationResult::ok()
    }

    async fn configure(&mut self, _config: &Value) -> Result<(), NotificationError> {
        Ok(())
    }

    async fn send_notification(&self, notification: &Notification) -> Result<SendReceipt, NotificationError> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.outbox.lock().unwrap().push(notification.clone());
        Ok(SendReceipt::default())
    }

    fn is_enabled(&self) -> bool {
        true
    }
}
