//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Local paths can reveal directory layouts and webhook or API URLs often
//! embed credentials; these helpers keep both out of spans and logs.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Keeps scheme and host of a URL and masks userinfo, path and query.
///
/// - `https://hooks.slack.com/services/T0/B0/XYZ` -> `https://hooks.slack.com/****`
/// - `https://user:pw@api.example.com/v1?key=k` -> `https://****@api.example.com/****`
/// - `http://localhost:8080` -> `http://localhost:8080`
pub fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return "<invalid url>".to_string();
    };
    let scheme = &url[..scheme_end + 3];
    let rest = &url[scheme_end + 3..];

    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..authority_end];
    let tail = &rest[authority_end..];

    let host = match authority.rfind('@') {
        Some(at) => format!("****@{}", &authority[at + 1..]),
        None => authority.to_string(),
    };

    if tail.is_empty() || tail == "/" {
        format!("{}{}{}", scheme, host, tail)
    } else {
        format!("{}{}/****", scheme, host)
    }
}
