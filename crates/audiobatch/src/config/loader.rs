use std::path::Path;

use crate::config::schema::Settings;
use crate::error::ConfigError;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_settings_from_str(&content)
}

pub fn load_settings_from_str(content: &str) -> Result<Settings, ConfigError> {
    let settings: Settings = serde_yaml::from_str(content)?;

    validate_settings(&settings)?;

    Ok(settings)
}

fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    if settings.download_directory.as_os_str().is_empty() {
        return Err(ConfigError::Validation {
            message: "download_directory must not be empty".to_string(),
        });
    }

    if let Err(e) = reqwest::Url::parse(&settings.analysis.endpoint) {
        return Err(ConfigError::Validation {
            message: format!(
                "analysis.endpoint '{}' is not a valid URL: {}",
                settings.analysis.endpoint, e
            ),
        });
    }

    if settings.analysis.timeout_seconds == 0 {
        return Err(ConfigError::Validation {
            message: "analysis.timeout_seconds must be greater than zero".to_string(),
        });
    }

    if !LOG_LEVELS.contains(&settings.logging.level.to_ascii_lowercase().as_str()) {
        return Err(ConfigError::Validation {
            message: format!(
                "Unsupported logging level '{}' (expected one of: {})",
                settings.logging.level,
                LOG_LEVELS.join(", ")
            ),
        });
    }

    if let Some(batch) = &settings.batch {
        batch.validate()?;
    }

    let mut names = std::collections::HashSet::new();
    for folder in &settings.folders {
        if folder.name.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "Seed folder names must not be empty".to_string(),
            });
        }
        if !names.insert(folder.name.as_str()) {
            return Err(ConfigError::Validation {
                message: format!("Duplicate seed folder name '{}'", folder.name),
            });
        }
    }

    for notification in &settings.notifications {
        if notification.name.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "Seed notification names must not be empty".to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
analysis:
  endpoint: "http://localhost:8080/analyze"
"#;

    #[test]
    fn test_minimal_settings() {
        let settings = load_settings_from_str(MINIMAL).unwrap();
        assert_eq!(settings.analysis.timeout_seconds, 600);
        assert_eq!(settings.logging.level, "info");
        assert!(!settings.logging.json);
        assert!(settings.batch.is_none());
        assert!(settings.folders.is_empty());
        assert!(settings.database_path().is_some());
    }

    #[test]
    fn test_full_settings() {
        let yaml = r#"
database_path: /var/lib/audiobatch/audiobatch.db
download_directory: /var/lib/audiobatch/downloads
analysis:
  endpoint: "https://analysis.internal/v1/analyze"
  timeout_seconds: 120
logging:
  level: debug
  json: true
batch:
  maxConcurrentFiles: 4
  retryConfig:
    maxRetries: 2
    delaySeconds: 10
  jobFailurePolicy: all_failed
folders:
  - name: Call recordings
    storageConfig:
      type: local
      config:
        basePath: /srv/calls
    monitorConfig:
      type: polling
      config:
        intervalSeconds: 60
    processingConfig:
      allowedExtensions: [mp3, wav]
      autoStart: true
notifications:
  - type: webhook
    name: Ops channel
    config:
      webhookUrl: "https://hooks.example.com/abc"
    conditions:
      - event: batch_failed
"#;
        let settings = load_settings_from_str(yaml).unwrap();
        let batch = settings.batch.unwrap();
        assert_eq!(batch.max_concurrent_files, 4);
        assert_eq!(batch.retry_config.max_retries, 2);
        assert!(batch.retry_config.exponential_backoff);
        assert_eq!(settings.folders.len(), 1);
        assert!(settings.folders[0].processing_config.auto_start);
        assert_eq!(settings.notifications[0].conditions.len(), 1);
        assert!(settings.logging.json);
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let yaml = "analysis:\n  endpoint: \"not a url\"\n";
        let result = load_settings_from_str(yaml);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_invalid_batch_rejected() {
        let yaml = format!("{}batch:\n  maxConcurrentFiles: 40\n", MINIMAL);
        assert!(load_settings_from_str(&yaml).is_err());
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let yaml = format!("{}logging:\n  level: chatty\n", MINIMAL);
        assert!(load_settings_from_str(&yaml).is_err());
    }

    #[test]
    fn test_malformed_yaml() {
        let result = load_settings_from_str("analysis: [unclosed");
        assert!(matches!(result, Err(ConfigError::ParseYaml(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = load_settings("/nonexistent/audiobatch.yaml");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audiobatch.yaml");
        std::fs::write(&path, MINIMAL).unwrap();
        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.analysis.endpoint, "http://localhost:8080/analyze");
    }
}
