//! File-name filters applied to scan results.

use glob::{MatchOptions, Pattern};
use log::debug;

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// One include or exclude rule. Patterns containing `*`, `?` or `[` are
/// globs; anything else is a case-insensitive substring.
#[derive(Debug, Clone)]
pub enum NamePattern {
    Glob(Pattern),
    Substring(String),
}

impl NamePattern {
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw.contains(['*', '?', '[']) {
            Pattern::new(raw)
                .map(Self::Glob)
                .map_err(|e| format!("invalid pattern '{}': {}", raw, e))
        } else {
            Ok(Self::Substring(raw.to_lowercase()))
        }
    }

    /// Globs with a `/` match the full path, other patterns the file name.
    pub fn matches(&self, name: &str, path: &str) -> bool {
        match self {
            Self::Glob(p) if p.as_str().contains('/') => p.matches_with(path, GLOB_OPTIONS),
            Self::Glob(p) => p.matches_with(name, GLOB_OPTIONS),
            Self::Substring(s) => name.to_lowercase().contains(s.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    include: Vec<NamePattern>,
    exclude: Vec<NamePattern>,
}

impl NameFilter {
    /// Parses both lists, collecting every bad pattern.
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, Vec<String>> {
        let mut errors = Vec::new();
        let mut parse_all = |raw: &[String]| -> Vec<NamePattern> {
            raw.iter()
                .filter_map(|p| NamePattern::parse(p).map_err(|e| errors.push(e)).ok())
                .collect()
        };
        let include = parse_all(include);
        let exclude = parse_all(exclude);
        if errors.is_empty() {
            Ok(Self { include, exclude })
        } else {
            Err(errors)
        }
    }

    /// Excludes win; an empty include list accepts everything else.
    pub fn accepts(&self, name: &str, path: &str) -> bool {
        if self.exclude.iter().any(|p| p.matches(name, path)) {
            debug!("File '{}' excluded by pattern", path);
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|p| p.matches(name, path))
    }
}
