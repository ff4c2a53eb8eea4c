//! Renders a [`Notification`] into each channel's native shape.

use serde_json::{json, Value};

use super::Notification;
use crate::config::NotificationEvent;

pub const SMS_MAX_CHARS: usize = 160;

/// Known `data` keys, in display order, with their labels.
const DETAIL_FIELDS: &[(&str, &str)] = &[
    ("folderName", "Folder"),
    ("jobName", "Job"),
    ("status", "Status"),
    ("totalFiles", "Total files"),
    ("processedFiles", "Processed"),
    ("failedFiles", "Failed"),
    ("skippedFiles", "Skipped"),
    ("cancelledFiles", "Cancelled"),
    ("fileName", "File"),
    ("errorCode", "Error code"),
    ("errorMessage", "Error"),
    ("retryCount", "Retries"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct EmailContent {
    pub subject: String,
    pub html: String,
    pub text: String,
}

fn accent(kind: NotificationEvent) -> &'static str {
    match kind {
        NotificationEvent::BatchCompleted => "#2eb67d",
        NotificationEvent::BatchStarted => "#1d9bd1",
        NotificationEvent::BatchCancelled => "#9e9e9e",
        NotificationEvent::BatchFailed | NotificationEvent::FileFailed => "#e01e5a",
        NotificationEvent::SystemAlert => "#ecb22e",
    }
}

fn heading(kind: NotificationEvent) -> &'static str {
    match kind {
        NotificationEvent::BatchStarted => "Batch started",
        NotificationEvent::BatchCompleted => "Batch completed",
        NotificationEvent::BatchFailed => "Batch failed",
        NotificationEvent::BatchCancelled => "Batch cancelled",
        NotificationEvent::FileFailed => "File failed",
        NotificationEvent::SystemAlert => "System alert",
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Label/value pairs for the known keys present in `data`, then the error
/// summary entries if any.
pub fn detail_rows(data: &Value) -> Vec<(String, String)> {
    let mut rows: Vec<(String, String)> = DETAIL_FIELDS
        .iter()
        .filter_map(|(key, label)| {
            data.get(*key)
                .filter(|v| !v.is_null())
                .map(|v| (label.to_string(), display_value(v)))
        })
        .collect();
    if let Some(summary) = data.get("errorSummary").and_then(Value::as_object) {
        for (code, count) in summary {
            rows.push((code.clone(), display_value(count)));
        }
    }
    rows
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

pub fn email(notification: &Notification, subject_prefix: Option<&str>) -> EmailContent {
    let subject = match subject_prefix.filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{} {}", prefix, notification.title),
        None => notification.title.clone(),
    };
    let rows = detail_rows(&notification.data);

    let mut text = format!(
        "{}\n\n{}\n",
        heading(notification.kind),
        notification.message
    );
    for (label, value) in &rows {
        text.push_str(&format!("{}: {}\n", label, value));
    }

    let mut html = format!(
        "<div style=\"font-family:sans-serif\"><h2 style=\"color:{}\">{}</h2><p>{}</p>",
        accent(notification.kind),
        escape_html(heading(notification.kind)),
        escape_html(&notification.message)
    );
    if !rows.is_empty() {
        html.push_str("<table>");
        for (label, value) in &rows {
            html.push_str(&format!(
                "<tr><th align=\"left\">{}</th><td>{}</td></tr>",
                escape_html(label),
                escape_html(value)
            ));
        }
        html.push_str("</table>");
    }
    html.push_str("</div>");

    EmailContent { subject, html, text }
}

/// One line, at most [`SMS_MAX_CHARS`] characters.
pub fn sms_body(notification: &Notification) -> String {
    let raw = format!("{}: {}", notification.title, notification.message);
    let line = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.chars().count() <= SMS_MAX_CHARS {
        return line;
    }
    let mut truncated: String = line.chars().take(SMS_MAX_CHARS - 3).collect();
    truncated.push_str("...");
    truncated
}

pub fn chat_payload(notification: &Notification, channel: Option<&str>, username: Option<&str>) -> Value {
    let fields: Vec<Value> = detail_rows(&notification.data)
        .into_iter()
        .map(|(title, value)| json!({"title": title, "value": value, "short": true}))
        .collect();

    let mut payload = json!({
        "text": format!("*{}*", notification.title),
        "attachments": [{
            "color": accent(notification.kind),
            "title": heading(notification.kind),
            "text": notification.message,
            "fields": fields,
            "footer": notification.kind.as_str(),
            "ts": chrono::Utc::now().timestamp(),
        }],
    });
    if let Some(channel) = channel {
        payload["channel"] = json!(channel);
    }
    if let Some(username) = username {
        payload["username"] = json!(username);
    }
    payload
}
