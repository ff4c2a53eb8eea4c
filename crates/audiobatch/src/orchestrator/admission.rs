//! Admission rules applied to every scanned file before a record exists.

use std::collections::HashSet;

use serde::Serialize;

use crate::config::ProcessingConfig;
use crate::providers::RemoteFile;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Admission {
    Admit,
    /// Gets a `skipped` record.
    Reject { reason: String },
    /// Already settled in an earlier job; no record is created.
    AlreadyProcessed,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admit)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdmissionFilter {
    max_file_size: Option<u64>,
    allowed_extensions: HashSet<String>,
    settled: HashSet<String>,
}

impl AdmissionFilter {
    pub fn new(config: &ProcessingConfig) -> Self {
        Self {
            max_file_size: config.max_file_size,
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            settled: HashSet::new(),
        }
    }

    /// Excludes remote paths that already have a final record.
    pub fn with_settled(mut self, settled: HashSet<String>) -> Self {
        self.settled = settled;
        self
    }

    pub fn check(&self, file: &RemoteFile) -> Admission {
        if self.settled.contains(&file.path) {
            return Admission::AlreadyProcessed;
        }
        if let Some(max) = self.max_file_size {
            if file.size > max {
                return Admission::Reject {
                    reason: format!("file size {} exceeds limit of {} bytes", file.size, max),
                };
            }
        }
        if !self.allowed_extensions.is_empty() {
            let allowed = file
                .extension()
                .is_some_and(|ext| self.allowed_extensions.contains(&ext));
            if !allowed {
                return Admission::Reject {
                    reason: format!(
                        "extension of '{}' is not in the allowed list",
                        file.name
                    ),
                };
            }
        }
        Admission::Admit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, size: u64) -> RemoteFile {
        RemoteFile {
            name: name.to_string(),
            path: format!("in/{}", name),
            size,
            modified: None,
        }
    }

    fn filter(max: Option<u64>, exts: &[&str]) -> AdmissionFilter {
        AdmissionFilter::new(&ProcessingConfig {
            max_file_size: max,
            allowed_extensions: exts.iter().map(|e| e.to_string()).collect(),
            auto_start: false,
        })
    }

    #[test]
    fn test_empty_rules_admit_everything() {
        assert!(filter(None, &[]).check(&file("notes.txt", 10)).is_admitted());
    }

    #[test]
    fn test_size_limit_is_inclusive() {
        let f = filter(Some(100), &[]);
        assert!(f.check(&file("a.wav", 100)).is_admitted());
        assert!(matches!(f.check(&file("a.wav", 101)), Admission::Reject { .. }));
    }

    #[test]
    fn test_extensions_ignore_case_and_dots() {
        let f = filter(None, &[".MP3", "wav"]);
        assert!(f.check(&file("CALL.Mp3", 1)).is_admitted());
        assert!(f.check(&file("b.wav", 1)).is_admitted());
        assert!(!f.check(&file("c.flac", 1)).is_admitted());
        assert!(!f.check(&file("no_extension", 1)).is_admitted());
    }

    #[test]
    fn test_completed_paths_are_not_readmitted() {
        let f = filter(None, &[]).with_settled(HashSet::from(["in/old.mp3".to_string()]));
        assert_eq!(f.check(&file("old.mp3", 1)), Admission::AlreadyProcessed);
        assert!(f.check(&file("new.mp3", 1)).is_admitted());
    }
}
