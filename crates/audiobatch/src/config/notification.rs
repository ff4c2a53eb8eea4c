//! Notification channel profiles and the conditions that select them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events the dispatcher can fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    BatchStarted,
    BatchCompleted,
    BatchFailed,
    BatchCancelled,
    FileFailed,
    SystemAlert,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BatchStarted => "batch_started",
            Self::BatchCompleted => "batch_completed",
            Self::BatchFailed => "batch_failed",
            Self::BatchCancelled => "batch_cancelled",
            Self::FileFailed => "file_failed",
            Self::SystemAlert => "system_alert",
        }
    }
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "batch_started" => Ok(Self::BatchStarted),
            "batch_completed" => Ok(Self::BatchCompleted),
            "batch_failed" => Ok(Self::BatchFailed),
            "batch_cancelled" => Ok(Self::BatchCancelled),
            "file_failed" => Ok(Self::FileFailed),
            "system_alert" => Ok(Self::SystemAlert),
            other => Err(format!("unknown notification event '{}'", other)),
        }
    }
}

/// Metric a threshold compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMetric {
    FailedFiles,
    ProcessedFiles,
    /// Failed files divided by total files, in percent.
    FailureRate,
    TotalFiles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdOperator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub metric: ThresholdMetric,
    pub operator: ThresholdOperator,
    pub value: f64,
}

/// An event name plus an optional threshold predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationCondition {
    pub event: NotificationEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Threshold>,
}

impl NotificationCondition {
    pub fn on(event: NotificationEvent) -> Self {
        Self {
            event,
            threshold: None,
        }
    }
}

/// A configured notification channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub name: String,
    pub config: Value,
    #[serde(default)]
    pub conditions: Vec<NotificationCondition>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a notification channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    #[serde(rename = "type")]
    pub notification_type: String,
    pub name: String,
    pub config: Value,
    #[serde(default)]
    pub conditions: Vec<NotificationCondition>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl NewNotification {
    pub fn into_config(self) -> NotificationConfig {
        let now = Utc::now();
        NotificationConfig {
            id: uuid::Uuid::new_v4().to_string(),
            notification_type: self.notification_type,
            name: self.name,
            config: self.config,
            conditions: self.conditions,
            is_active: self.is_active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update for a notification channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationUpdate {
    pub name: Option<String>,
    pub config: Option<Value>,
    pub conditions: Option<Vec<NotificationCondition>>,
    pub is_active: Option<bool>,
}

impl NotificationUpdate {
    pub fn apply_to(self, notification: &mut NotificationConfig) {
        if let Some(name) = self.name {
            notification.name = name;
        }
        if let Some(config) = self.config {
            notification.config = config;
        }
        if let Some(conditions) = self.conditions {
            notification.conditions = conditions;
        }
        if let Some(active) = self.is_active {
            notification.is_active = active;
        }
        notification.updated_at = Utc::now();
    }
}
