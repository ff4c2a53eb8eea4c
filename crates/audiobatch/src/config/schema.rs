use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::batch::GlobalBatchConfig;
use crate::config::folder::NewFolder;
use crate::config::notification::NewNotification;

/// Daemon settings, read from `audiobatch.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// SQLite file holding configuration and record state.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Directory files are downloaded into before analysis.
    #[serde(default = "default_download_directory")]
    pub download_directory: PathBuf,
    pub analysis: AnalysisSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Seed batch config, stored on first start only.
    #[serde(default)]
    pub batch: Option<GlobalBatchConfig>,
    /// Seed folder profiles, stored when the store has none.
    #[serde(default)]
    pub folders: Vec<NewFolder>,
    /// Seed notification channels, stored when the store has none.
    #[serde(default)]
    pub notifications: Vec<NewNotification>,
}

fn default_download_directory() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".audiobatch").join("downloads"))
        .unwrap_or_else(|| PathBuf::from("downloads"))
}

impl Settings {
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// URL the analysis request is POSTed to.
    pub endpoint: String,
    #[serde(default = "default_analysis_timeout")]
    pub timeout_seconds: u64,
}

fn default_analysis_timeout() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}
