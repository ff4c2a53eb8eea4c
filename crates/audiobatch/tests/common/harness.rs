//! Test harness for isolated end-to-end runs.
//!
//! `TestHarness` owns an in-memory store, a temporary download directory and
//! a `BatchService` whose registry knows the scripted providers next to the
//! built-in ones.

#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use audiobatch::config::{
    GlobalBatchConfig, NewFolder, NewNotification, NotificationCondition, ProcessingConfig, ProviderConfig,
    RetryConfig,
};
use audiobatch::events::BatchEventBroadcaster;
use audiobatch::providers::{NotificationProvider, ProviderRegistry, StorageProvider};
use audiobatch::{BatchService, Database};

use super::fakes::{GaugedAnalyzer, Gauge, Outbox, RecordingNotifier, ScriptedStorage, StorageScript};

pub struct TestHarness {
    pub service: BatchService,
    pub db: Database,
    pub script: Arc<StorageScript>,
    pub analyzer: Arc<GaugedAnalyzer>,
    pub gauge: Arc<Gauge>,
    pub outbox: Outbox,
    notification_delay: Arc<Mutex<Duration>>,
    download_dir: TempDir,
}

impl TestHarness {
    /// Harness with `config` stored as the global batch config.
    pub fn new(config: GlobalBatchConfig) -> Self {
        Self::with_analysis_delay(config, Duration::ZERO)
    }

    pub fn with_analysis_delay(config: GlobalBatchConfig, analysis_delay: Duration) -> Self {
        let db = Database::open_in_memory().expect("Failed to open in-memory database");
        let download_dir = TempDir::new().expect("Failed to create download directory");
        let gauge = Arc::new(Gauge::default());
        let script = StorageScript::new(Arc::clone(&gauge));
        let outbox: Outbox = Arc::new(Mutex::new(Vec::new()));
        let notification_delay = Arc::new(Mutex::new(Duration::ZERO));

        let mut registry = ProviderRegistry::with_defaults();
        let storage_script = Arc::clone(&script);
        registry.register_storage(
            "scripted",
            Arc::new(move || Box::new(ScriptedStorage::new(Arc::clone(&storage_script))) as Box<dyn StorageProvider>),
        );
        let sink = Arc::clone(&outbox);
        let delay = Arc::clone(&notification_delay);
        registry.register_notification(
            "recording",
            Arc::new(move || {
                Box::new(RecordingNotifier::new(Arc::clone(&sink), Arc::clone(&delay))) as Box<dyn NotificationProvider>
            }),
        );

        let analyzer = Arc::new(GaugedAnalyzer::new(Arc::clone(&gauge), analysis_delay));
        let service = BatchService::new(
            db.clone(),
            Arc::new(registry),
            Arc::clone(&analyzer) as Arc<dyn audiobatch::Analyzer>,
            BatchEventBroadcaster::default(),
            download_dir.path().to_path_buf(),
        )
        .expect("Failed to build service");
        service
            .update_batch_config(config)
            .expect("Failed to store batch config");

        Self {
            service,
            db,
            script,
            analyzer,
            gauge,
            outbox,
            notification_delay,
            download_dir,
        }
    }

    /// Every later send of the recording channel sleeps this long first.
    pub fn set_notification_delay(&self, delay: Duration) {
        *self.notification_delay.lock().unwrap() = delay;
    }

    pub fn download_dir(&self) -> &std::path::Path {
        self.download_dir.path()
    }

    /// A folder on the scripted storage watched by the polling monitor.
    pub async fn add_folder(&self, processing: ProcessingConfig) -> String {
        let folder = NewFolder {
            name: "Scripted".to_string(),
            storage_config: ProviderConfig::new("scripted", json!({})),
            monitor_config: ProviderConfig::new("polling", json!({"intervalSeconds": 30})),
            processing_config: processing,
            is_active: true,
        };
        self.service
            .create_folder(folder)
            .await
            .expect("Failed to create folder")
            .id
    }

    /// A recording notification channel.
    pub fn add_channel(&self, conditions: Vec<NotificationCondition>) -> String {
        let channel = NewNotification {
            notification_type: "recording".to_string(),
            name: "Recorder".to_string(),
            config: json!({}),
            conditions,
            is_active: true,
        };
        self.service
            .create_notification(channel)
            .expect("Failed to create channel")
            .id
    }

    pub fn sent_titles(&self) -> Vec<String> {
        self.outbox.lock().unwrap().iter().map(|n| n.title.clone()).collect()
    }
}

/// Global config with `k` workers and an immediate retry budget.
pub fn batch_config(k: u32, max_retries: u32) -> GlobalBatchConfig {
    GlobalBatchConfig {
        max_concurrent_files: k,
        retry_config: RetryConfig {
            enabled: true,
            max_retries,
            delay_seconds: 0,
            exponential_backoff: true,
        },
        ..GlobalBatchConfig::default()
    }
}

/// Admission rules allowing the given extensions.
pub fn allow(extensions: &[&str]) -> ProcessingConfig {
    ProcessingConfig {
        max_file_size: None,
        allowed_extensions: extensions.iter().map(|e| e.to_string()).collect(),
        auto_start: false,
    }
}

/// Polls `check` until it returns true or the timeout passes.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
