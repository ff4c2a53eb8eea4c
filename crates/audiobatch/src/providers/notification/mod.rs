//! Notification providers deliver a structured event to an external channel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::NotificationError;
use super::{ProviderTestResult, ValidationResult};
use crate::config::NotificationEvent;

pub mod email;
pub mod sms;
pub mod template;
pub mod webhook;

pub use email::EmailNotificationProvider;
pub use sms::SmsNotificationProvider;
pub use webhook::WebhookNotificationProvider;

/// A channel-independent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationEvent,
    /// Overrides the channel's configured recipients when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipients: Option<Vec<String>>,
    #[serde(default)]
    pub data: Value,
}

impl Notification {
    pub fn new(kind: NotificationEvent, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            kind,
            recipients: None,
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// The synthetic message sent by `test_notification`.
    pub fn test_message() -> Self {
        Self::new(
            NotificationEvent::SystemAlert,
            "Test notification",
            "This is a test message from the audio batch engine.",
        )
        .with_data(json!({"test": true}))
    }
}

/// Channel receipt of an accepted message.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[async_trait]
pub trait NotificationProvider: Send + Sync {
    fn provider_type(&self) -> &'static str;

    fn validate_config(&self, config: &Value) -> ValidationResult;

    /// Resolves secrets and builds the client. Sends nothing.
    async fn configure(&mut self, config: &Value) -> Result<(), NotificationError>;

    async fn send_notification(&self, notification: &Notification) -> Result<SendReceipt, NotificationError>;

    /// Configured and not switched off with `enabled: false`.
    fn is_enabled(&self) -> bool;

    /// Configures, then sends [`Notification::test_message`].
    async fn test_notification(&mut self, config: &Value) -> ProviderTestResult {
        let validation = self.validate_config(config);
        if !validation.valid {
            return ProviderTestResult::failure(
                validation.errors.join("; "),
                json!({"errors": validation.errors}),
            );
        }
        if let Err(e) = self.configure(config).await {
            return ProviderTestResult::failure(e.to_string(), Value::Null);
        }
        match self.send_notification(&Notification::test_message()).await {
            Ok(receipt) => ProviderTestResult::success(
                format!("Test {} notification sent", self.provider_type()),
                json!({"id": receipt.id}),
            ),
            Err(e) => ProviderTestResult::failure(e.to_string(), Value::Null),
        }
    }
}

/// `enabled` defaults to true.
pub(crate) fn enabled_flag(config: &Value) -> bool {
    config.get("enabled").and_then(Value::as_bool).unwrap_or(true)
}

/// Validates an optional list-of-strings field.
pub(crate) fn check_recipients(config: &Value, key: &str, required: bool, errors: &mut Vec<String>) {
    match config.get(key) {
        None if required => errors.push(format!("{} is required", key)),
        None => {}
        Some(Value::Array(items)) if !items.is_empty() && items.iter().all(Value::is_string) => {}
        Some(Value::Array(items)) if items.is_empty() && !required => {}
        Some(_) => errors.push(format!("{} must be a non-empty list of strings", key)),
    }
}

pub(crate) fn string_list(config: &Value, key: &str) -> Vec<String> {
    config
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn check_url(config: &Value, key: &str, errors: &mut Vec<String>) {
    match config.get(key).and_then(Value::as_str).map(reqwest::Url::parse) {
        Some(Ok(url)) if matches!(url.scheme(), "http" | "https") => {}
        Some(_) => errors.push(format!("{} must be an http(s) URL", key)),
        None => errors.push(format!("{} is required", key)),
    }
}

/// Turns a non-2xx response into [`NotificationError::Http`].
pub(crate) async fn check_response(response: reqwest::Response) -> Result<Value, NotificationError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(NotificationError::Http {
            status: status.as_u16(),
            body,
        });
    }
    let text = response.text().await?;
    Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
}
