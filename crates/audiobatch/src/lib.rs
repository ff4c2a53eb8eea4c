pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod logging;
pub mod orchestrator;
pub mod providers;
pub mod sanitize;
pub mod secrets;
pub mod service;
pub mod supervisor;
pub mod tracker;

pub use config::{load_settings, BatchConfigHandle, ExternalFolderConfig, GlobalBatchConfig, NotificationConfig, Settings};
pub use db::Database;
pub use dispatch::NotificationDispatcher;
pub use error::{AudiobatchError, ConfigError, OrchestratorError, Result, TrackerError};
pub use events::{BatchEvent, BatchEventBroadcaster};
pub use orchestrator::{Analyzer, BatchJob, BatchOrchestrator, HttpAnalyzer, JobOptions, JobStatus, StartedJob};
pub use providers::{ProviderRegistry, RemoteFile, StorageProvider};
pub use secrets::{resolve_config_secret, resolve_secret, SecretError};
pub use service::BatchService;
pub use supervisor::MonitorSupervisor;
pub use tracker::{ErrorCode, FileProcessingRecord, FileStatus, FileStatusTracker};
