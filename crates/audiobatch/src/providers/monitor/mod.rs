//! Monitor providers discover candidate files in an external folder, on a
//! timer or on demand.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::MonitorError;
use super::storage::RemoteFile;
use super::{ProviderTestResult, ValidationResult};

pub mod filter;
pub mod polling;

pub use filter::{NameFilter, NamePattern};
pub use polling::PollingMonitorProvider;

/// Receives the file set of every scan a running monitor performs.
pub type ScanCallback = Arc<dyn Fn(Vec<RemoteFile>) + Send + Sync>;

/// Identifies one running monitor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorHandle(String);

impl MonitorHandle {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MonitorHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MonitorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub is_active: bool,
    pub last_scan: Option<DateTime<Utc>>,
    pub scan_count: u64,
    pub last_file_count: usize,
    pub last_error: Option<String>,
}

#[async_trait]
pub trait MonitorProvider: Send + Sync {
    fn provider_type(&self) -> &'static str;

    fn validate_config(&self, config: &Value) -> ValidationResult;

    /// Applies the config. Performs no scan.
    async fn configure(&mut self, config: &Value) -> Result<(), MonitorError>;

    /// Scans once, synchronously, then keeps scanning on the configured
    /// cadence until stopped.
    async fn start_monitoring(
        &self,
        config: &Value,
        callback: Option<ScanCallback>,
    ) -> Result<MonitorHandle, MonitorError>;

    /// Cancels the timer and forgets the handle. `false` for unknown handles.
    async fn stop_monitoring(&self, handle: &MonitorHandle) -> bool;

    /// One on-demand scan with name filters applied.
    async fn scan_for_files(&self, config: &Value) -> Result<Vec<RemoteFile>, MonitorError>;

    fn get_status(&self, handle: &MonitorHandle) -> Result<MonitorStatus, MonitorError>;

    async fn test_monitoring(&self, config: &Value) -> ProviderTestResult;

    /// Stops every running monitor.
    async fn stop_all(&self);
}
