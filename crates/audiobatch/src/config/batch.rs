//! Process-wide batch settings and the hot-reloadable snapshot handle.
//!
//! A running job captures one `Arc<GlobalBatchConfig>` when it starts and
//! keeps it for its whole life. Reloading swaps the handle's snapshot, so
//! only jobs started afterwards see the new values.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::db::{settings_repo, Database};
use crate::error::ConfigError;

pub const MIN_CONCURRENT_FILES: u32 = 1;
pub const MAX_CONCURRENT_FILES: u32 = 20;
pub const MAX_RETRIES_LIMIT: u32 = 10;
pub const MAX_RETRY_DELAY_SECONDS: u64 = 3600;

/// Key of the singleton row in `batch_settings`.
pub const BATCH_SETTINGS_KEY: &str = "global_batch_config";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: u64,
    #[serde(default = "default_true")]
    pub exponential_backoff: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: default_max_retries(),
            delay_seconds: default_delay_seconds(),
            exponential_backoff: true,
        }
    }
}

impl RetryConfig {
    /// Retry budget a new record receives.
    pub fn effective_max_retries(&self) -> u32 {
        if self.enabled {
            self.max_retries
        } else {
            0
        }
    }
}

/// When a finished job is marked `failed` instead of `completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobFailurePolicy {
    /// Any admitted record ended `failed`.
    #[default]
    AnyFailure,
    /// Every admitted record ended `failed`.
    AllFailed,
    /// Finished jobs are always `completed`.
    Never,
}

impl JobFailurePolicy {
    pub fn job_failed(&self, total: u64, failed: u64) -> bool {
        match self {
            Self::AnyFailure => failed > 0,
            Self::AllFailed => total > 0 && failed == total,
            Self::Never => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalBatchConfig {
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: u32,
    #[serde(default)]
    pub retry_config: RetryConfig,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default = "default_true")]
    pub immediate_processing: bool,
    #[serde(default = "default_true")]
    pub background_processing: bool,
    #[serde(default = "default_analysis_timeout_seconds")]
    pub analysis_timeout_seconds: u64,
    #[serde(default)]
    pub job_failure_policy: JobFailurePolicy,
    #[serde(default)]
    pub keep_downloads: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_files() -> u32 {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_delay_seconds() -> u64 {
    30
}

fn default_analysis_timeout_seconds() -> u64 {
    600
}

impl Default for GlobalBatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_files: default_max_concurrent_files(),
            retry_config: RetryConfig::default(),
            auto_start: false,
            immediate_processing: true,
            background_processing: true,
            analysis_timeout_seconds: default_analysis_timeout_seconds(),
            job_failure_policy: JobFailurePolicy::default(),
            keep_downloads: false,
        }
    }
}

impl GlobalBatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_CONCURRENT_FILES..=MAX_CONCURRENT_FILES).contains(&self.max_concurrent_files) {
            return Err(ConfigError::Validation {
                message: format!(
                    "maxConcurrentFiles must be between {} and {}, got {}",
                    MIN_CONCURRENT_FILES, MAX_CONCURRENT_FILES, self.max_concurrent_files
                ),
            });
        }
        if self.retry_config.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::Validation {
                message: format!(
                    "retryConfig.maxRetries must be at most {}, got {}",
                    MAX_RETRIES_LIMIT, self.retry_config.max_retries
                ),
            });
        }
        if self.retry_config.delay_seconds > MAX_RETRY_DELAY_SECONDS {
            return Err(ConfigError::Validation {
                message: format!(
                    "retryConfig.delaySeconds must be at most {}, got {}",
                    MAX_RETRY_DELAY_SECONDS, self.retry_config.delay_seconds
                ),
            });
        }
        if self.analysis_timeout_seconds == 0 {
            return Err(ConfigError::Validation {
                message: "analysisTimeoutSeconds must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Clamps a requested worker count into the allowed range, falling back
    /// to this config's default when none is given.
    pub fn worker_count(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.max_concurrent_files)
            .clamp(MIN_CONCURRENT_FILES, MAX_CONCURRENT_FILES)
    }
}

/// Shared handle to the current batch settings snapshot.
#[derive(Clone)]
pub struct BatchConfigHandle {
    current: Arc<RwLock<Arc<GlobalBatchConfig>>>,
}

impl BatchConfigHandle {
    pub fn new(config: GlobalBatchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
        })
    }

    /// Returns the snapshot new jobs should capture.
    pub fn snapshot(&self) -> Arc<GlobalBatchConfig> {
        let guard = self.current.read().unwrap_or_else(|poisoned| {
            log::warn!("Batch config lock was poisoned, recovering");
            poisoned.into_inner()
        });
        Arc::clone(&guard)
    }

    /// Validates and installs a new snapshot. Running jobs keep theirs.
    pub fn reload(&self, config: GlobalBatchConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let mut guard = self.current.write().unwrap_or_else(|poisoned| {
            log::warn!("Batch config lock was poisoned, recovering");
            poisoned.into_inner()
        });
        *guard = Arc::new(config);
        log::info!(
            "Batch config reloaded (maxConcurrentFiles={})",
            guard.max_concurrent_files
        );
        Ok(())
    }

    /// Reloads from the configuration store. Leaves the snapshot untouched
    /// when nothing has been stored yet.
    pub fn reload_from_store(&self, db: &Database) -> Result<bool, ConfigError> {
        match load_from_store(db)? {
            Some(config) => {
                self.reload(config)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Reads the stored batch config, if any.
pub fn load_from_store(db: &Database) -> Result<Option<GlobalBatchConfig>, ConfigError> {
    let value = settings_repo::get(db, BATCH_SETTINGS_KEY)
        .map_err(|e| ConfigError::Store(e.to_string()))?;
    match value {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Validates and persists the batch config.
pub fn save_to_store(db: &Database, config: &GlobalBatchConfig) -> Result<(), ConfigError> {
    config.validate()?;
    let value = serde_json::to_value(config)?;
    settings_repo::put(db, BATCH_SETTINGS_KEY, &value).map_err(|e| ConfigError::Store(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GlobalBatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.job_failure_policy, JobFailurePolicy::AnyFailure);
        assert_eq!(config.analysis_timeout_seconds, 600);
        assert!(!config.keep_downloads);
    }

    #[test]
    fn test_rejects_out_of_range_concurrency() {
        for bad in [0, 21] {
            let config = GlobalBatchConfig {
                max_concurrent_files: bad,
                ..Default::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::Validation { .. })
            ));
        }
    }

    #[test]
    fn test_rejects_too_many_retries() {
        let mut config = GlobalBatchConfig::default();
        config.retry_config.max_retries = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_worker_count_clamps() {
        let config = GlobalBatchConfig::default();
        assert_eq!(config.worker_count(None), 3);
        assert_eq!(config.worker_count(Some(0)), 1);
        assert_eq!(config.worker_count(Some(50)), 20);
        assert_eq!(config.worker_count(Some(7)), 7);
    }

    #[test]
    fn test_disabled_retries_have_no_budget() {
        let retry = RetryConfig {
            enabled: false,
            max_retries: 5,
            ..Default::default()
        };
        assert_eq!(retry.effective_max_retries(), 0);
    }

    #[test]
    fn test_failure_policy() {
        assert!(JobFailurePolicy::AnyFailure.job_failed(3, 1));
        assert!(!JobFailurePolicy::AnyFailure.job_failed(3, 0));
        assert!(!JobFailurePolicy::AllFailed.job_failed(3, 2));
        assert!(JobFailurePolicy::AllFailed.job_failed(3, 3));
        assert!(!JobFailurePolicy::AllFailed.job_failed(0, 0));
        assert!(!JobFailurePolicy::Never.job_failed(3, 3));
    }

    #[test]
    fn test_reload_keeps_old_snapshot_alive() {
        let handle = BatchConfigHandle::new(GlobalBatchConfig::default()).unwrap();
        let captured = handle.snapshot();

        handle
            .reload(GlobalBatchConfig {
                max_concurrent_files: 9,
                ..Default::default()
            })
            .unwrap();

        assert_eq!(captured.max_concurrent_files, 3);
        assert_eq!(handle.snapshot().max_concurrent_files, 9);
    }

    #[test]
    fn test_reload_rejects_invalid() {
        let handle = BatchConfigHandle::new(GlobalBatchConfig::default()).unwrap();
        let result = handle.reload(GlobalBatchConfig {
            max_concurrent_files: 0,
            ..Default::default()
        });
        assert!(result.is_err());
        assert_eq!(handle.snapshot().max_concurrent_files, 3);
    }

    #[test]
    fn test_store_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let handle = BatchConfigHandle::new(GlobalBatchConfig::default()).unwrap();
        assert!(!handle.reload_from_store(&db).unwrap());

        let stored = GlobalBatchConfig {
            max_concurrent_files: 5,
            keep_downloads: true,
            ..Default::default()
        };
        save_to_store(&db, &stored).unwrap();

        assert!(handle.reload_from_store(&db).unwrap());
        assert_eq!(*handle.snapshot(), stored);
    }
}
