//! Secret resolution for provider credentials.
//!
//! A credential field `x` in a provider config may be given three ways, tried
//! in order:
//!
//! 1. `x` - the value itself, for local testing
//! 2. `xFile` - a file holding the value (Docker secrets)
//! 3. `xEnv` - an environment variable holding the value

use secrecy::SecretString;
use serde_json::Value;
use std::fs;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided for '{field}' (set {field}, {field}File or {field}Env)")]
    NoSourceProvided { field: String },

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Resolves a secret from the first non-empty source: direct value, file
/// contents, then environment variable. `None` when no source is set.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(Some(SecretString::from(value.to_string())));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        let content = fs::read_to_string(&expanded).map_err(|e| SecretError::FileReadError {
            path: expanded.clone(),
            source: e,
        })?;
        return Ok(Some(SecretString::from(content.trim().to_string())));
    }

    if let Some(name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(name) {
            // Env files often carry a trailing newline.
            Ok(value) => Ok(Some(SecretString::from(value.trim().to_string()))),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Ok(None)
}

/// Resolves credential `field` of a provider config using the
/// `field` / `fieldFile` / `fieldEnv` convention.
pub fn resolve_config_secret(config: &Value, field: &str) -> Result<Option<SecretString>> {
    let file_key = format!("{}File", field);
    let env_key = format!("{}Env", field);
    resolve_secret(
        config.get(field).and_then(Value::as_str),
        config.get(&file_key).and_then(Value::as_str),
        config.get(&env_key).and_then(Value::as_str),
    )
}

/// Like [`resolve_config_secret`], but a missing source is an error.
pub fn require_config_secret(config: &Value, field: &str) -> Result<SecretString> {
    resolve_config_secret(config, field)?.ok_or_else(|| SecretError::NoSourceProvided {
        field: field.to_string(),
    })
}

/// Whether any of the three sources for `field` is set. Used by config
/// validation, which must not touch files or the environment.
pub fn has_config_secret(config: &Value, field: &str) -> bool {
    [field.to_string(), format!("{}File", field), format!("{}Env", field)]
        .iter()
        .any(|key| config.get(key).and_then(Value::as_str).is_some_and(|s| !s.is_empty()))
}

/// Expands a leading `~` to the user's home directory.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy();
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serde_json::json;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // Tests that modify environment variables must run serially.
    #[test]
    #[serial]
    fn test_direct_value_takes_priority() {
        std::env::set_var("AUDIOBATCH_TEST_SECRET_1", "env_value");
        let result = resolve_secret(Some("direct_value"), None, Some("AUDIOBATCH_TEST_SECRET_1"))
            .unwrap()
            .unwrap();
        assert_eq!(result.expose_secret(), "direct_value");
        std::env::remove_var("AUDIOBATCH_TEST_SECRET_1");
    }

    #[test]
    #[serial]
    fn test_file_takes_priority_over_env() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "file_value").unwrap();

        std::env::set_var("AUDIOBATCH_TEST_SECRET_2", "env_value");
        let result = resolve_secret(
            None,
            Some(temp_file.path().to_str().unwrap()),
            Some("AUDIOBATCH_TEST_SECRET_2"),
        )
        .unwrap()
        .unwrap();
        assert_eq!(result.expose_secret(), "file_value");
        std::env::remove_var("AUDIOBATCH_TEST_SECRET_2");
    }

    #[test]
    #[serial]
    fn test_config_env_fallback() {
        std::env::set_var("AUDIOBATCH_TEST_SECRET_3", "  from_env\n");
        let config = json!({"apiKey": "", "apiKeyEnv": "AUDIOBATCH_TEST_SECRET_3"});
        let result = require_config_secret(&config, "apiKey").unwrap();
        assert_eq!(result.expose_secret(), "from_env");
        std::env::remove_var("AUDIOBATCH_TEST_SECRET_3");
    }

    #[test]
    fn test_no_source_is_none() {
        assert!(resolve_secret(None, None, None).unwrap().is_none());
        let result = require_config_secret(&json!({}), "authToken");
        assert!(matches!(result, Err(SecretError::NoSourceProvided { .. })));
    }

    #[test]
    fn test_file_not_found_error() {
        let result = resolve_secret(None, Some("/nonexistent/path/to/secret"), None);
        assert!(matches!(result, Err(SecretError::FileReadError { .. })));
    }

    #[test]
    fn test_env_var_not_set_error() {
        let result = resolve_secret(None, None, Some("AUDIOBATCH_DEFINITELY_NOT_SET_12345"));
        assert!(matches!(result, Err(SecretError::EnvVarNotSet { .. })));
    }

    #[test]
    fn test_has_config_secret() {
        assert!(has_config_secret(&json!({"apiKey": "k"}), "apiKey"));
        assert!(has_config_secret(&json!({"apiKeyFile": "/run/secrets/k"}), "apiKey"));
        assert!(!has_config_secret(&json!({"apiKey": ""}), "apiKey"));
        assert!(!has_config_secret(&json!({"other": "x"}), "apiKey"));
    }
}
