//! Email through an HTTP mail API.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use super::{
    check_recipients, check_response, check_url, enabled_flag, string_list, template, Notification,
    NotificationProvider, SendReceipt,
};
use crate::providers::error::NotificationError;
use crate::providers::{config_str, require_object, ValidationResult};
use crate::sanitize::redact_url;
use crate::secrets::{has_config_secret, require_config_secret};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

struct EmailSettings {
    api_url: String,
    api_key: SecretString,
    from: String,
    to: Vec<String>,
    subject_prefix: Option<String>,
    enabled: bool,
}

#[derive(Default)]
pub struct EmailNotificationProvider {
    client: Option<reqwest::Client>,
    settings: Option<EmailSettings>,
}

impl EmailNotificationProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationProvider for EmailNotificationProvider {
    fn provider_type(&self) -> &'static str {
        "email"
    }

    fn validate_config(&self, config: &Value) -> ValidationResult {
        let mut errors = Vec::new();
        if require_object(config, &mut errors) {
            check_url(config, "apiUrl", &mut errors);
            if !has_config_secret(config, "apiKey") {
                errors.push("apiKey is required (apiKey, apiKeyFile or apiKeyEnv)".to_string());
            }
            match config_str(config, "from") {
                Some(from) if from.contains('@') => {}
                _ => errors.push("from must be an email address".to_string()),
            }
            check_recipients(config, "to", true, &mut errors);
            for address in string_list(config, "to") {
                if !address.contains('@') {
                    errors.push(format!("'{}' is not an email address", address));
                }
            }
        }
        ValidationResult::from_errors(errors)
    }

    async fn configure(&mut self, config: &Value) -> Result<(), NotificationError> {
        let validation = self.validate_config(config);
        if !validation.valid {
            return Err(NotificationError::InvalidConfig(validation.errors.join("; ")));
        }
        let settings = EmailSettings {
            api_url: config_str(config, "apiUrl").unwrap_or_default().to_string(),
            api_key: require_config_secret(config, "apiKey")?,
            from: config_str(config, "from").unwrap_or_default().to_string(),
            to: string_list(config, "to"),
            subject_prefix: config_str(config, "subjectPrefix").map(str::to_string),
            enabled: enabled_flag(config),
        };
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        info!("Email notifications configured via {}", redact_url(&settings.api_url));
        self.client = Some(client);
        self.settings = Some(settings);
        Ok(())
    }

    async fn send_notification(&self, notification: &Notification) -> Result<SendReceipt, NotificationError> {
        let (Some(client), Some(settings)) = (&self.client, &self.settings) else {
            return Err(NotificationError::NotConfigured);
        };
        if !settings.enabled {
            return Err(NotificationError::Disabled);
        }

        let content = template::email(notification, settings.subject_prefix.as_deref());
        let to = notification.recipients.clone().unwrap_or_else(|| settings.to.clone());
        let body = json!({
            "from": settings.from,
            "to": to,
            "subject": content.subject,
            "html": content.html,
            "text": content.text,
        });

        let response = client
            .post(&settings.api_url)
            .bearer_auth(settings.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;
        let reply = check_response(response).await?;
        let id = reply
            .get("id")
            .or_else(|| reply.get("messageId"))
            .and_then(Value::as_str)
            .map(str::to_string);
        debug!("Email '{}' accepted ({} recipients)", notification.title, to.len());
        Ok(SendReceipt { id })
    }

    fn is_enabled(&self) -> bool {
        self.settings.as_ref().is_some_and(|s| s.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationEvent;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str) -> Value {
        json!({
            "apiUrl": format!("{}/v1/send", url),
            "apiKey": "key-123",
            "from": "batch@example.com",
            "to": ["ops@example.com"],
        })
    }

    #[test]
    fn test_validate_config() {
        let provider = EmailNotificationProvider::new();
        assert!(provider.validate_config(&config("http://mail")).valid);

        let result = provider.validate_config(&json!({"from": "nobody", "to": ["x"]}));
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 4);
    }

    #[tokio::test]
    async fn test_send_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/send"))
            .and(header("authorization", "Bearer key-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg-1"})))
            .expect(1)
            .mount(&server)
            .await;

        let mut provider = EmailNotificationProvider::new();
        provider.configure(&config(&server.uri())).await.unwrap();
        assert!(provider.is_enabled());

        let receipt = provider
            .send_notification(&Notification::new(NotificationEvent::BatchCompleted, "Done", "All good"))
            .await
            .unwrap();
        assert_eq!(receipt.id.as_deref(), Some("msg-1"));

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["to"][0], "ops@example.com");
        assert!(body["html"].as_str().unwrap().contains("All good"));
        assert!(body["text"].as_str().unwrap().contains("Batch completed"));
    }

    #[tokio::test]
    async fn test_http_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let mut provider = EmailNotificationProvider::new();
        provider.configure(&config(&server.uri())).await.unwrap();
        let err = provider
            .send_notification(&Notification::test_message())
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::Http { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_disabled_and_unconfigured() {
        let provider = EmailNotificationProvider::new();
        assert!(!provider.is_enabled());
        assert!(matches!(
            provider.send_notification(&Notification::test_message()).await,
            Err(NotificationError::NotConfigured)
        ));

        let mut config = config("http://localhost:1");
        config["enabled"] = json!(false);
        let mut provider = EmailNotificationProvider::new();
        provider.configure(&config).await.unwrap();
        assert!(!provider.is_enabled());
        assert!(matches!(
            provider.send_notification(&Notification::test_message()).await,
            Err(NotificationError::Disabled)
        ));
    }
}
