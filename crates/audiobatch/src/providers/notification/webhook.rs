//! Chat webhook (incoming-webhook JSON with rich attachments).

use std::time::Duration;

use async_trait::async_trait;
use log::info;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use super::{check_response, enabled_flag, template, Notification, NotificationProvider, SendReceipt};
use crate::providers::error::NotificationError;
use crate::providers::{config_str, require_object, ValidationResult};
use crate::sanitize::redact_url;
use crate::secrets::{has_config_secret, require_config_secret};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

struct WebhookSettings {
    /// The URL is the credential for most chat services.
    url: SecretString,
    channel: Option<String>,
    username: Option<String>,
    enabled: bool,
}

#[derive(Default)]
pub struct WebhookNotificationProvider {
    client: Option<reqwest::Client>,
    settings: Option<WebhookSettings>,
}

impl WebhookNotificationProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationProvider for WebhookNotificationProvider {
    fn provider_type(&self) -> &'static str {
        "webhook"
    }

    fn validate_config(&self, config: &Value) -> ValidationResult {
        let mut errors = Vec::new();
        if require_object(config, &mut errors) {
            if !has_config_secret(config, "webhookUrl") {
                errors.push("webhookUrl is required (webhookUrl, webhookUrlFile or webhookUrlEnv)".to_string());
            } else if let Some(url) = config_str(config, "webhookUrl") {
                if !matches!(reqwest::Url::parse(url), Ok(u) if matches!(u.scheme(), "http" | "https")) {
                    errors.push("webhookUrl must be an http(s) URL".to_string());
                }
            }
            for key in ["channel", "username"] {
                if config.get(key).is_some_and(|v| !v.is_string()) {
                    errors.push(format!("{} must be a string", key));
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
        let url = require_config_secret(config, "webhookUrl")?;
        reqwest::Url::parse(url.expose_secret())
            .map_err(|e| NotificationError::InvalidConfig(format!("webhookUrl: {}", e)))?;

        info!("Webhook notifications configured for {}", redact_url(url.expose_secret()));
        self.client = Some(reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?);
        self.settings = Some(WebhookSettings {
            url,
            channel: config_str(config, "channel").map(str::to_string),
            username: config_str(config, "username").map(str::to_string),
            enabled: enabled_flag(config),
        });
        Ok(())
    }

    async fn send_notification(&self, notification: &Notification) -> Result<SendReceipt, NotificationError> {
        let (Some(client), Some(settings)) = (&self.client, &self.settings) else {
            return Err(NotificationError::NotConfigured);
        };
        if !settings.enabled {
            return Err(NotificationError::Disabled);
        }

        let payload = template::chat_payload(
            notification,
            settings.channel.as_deref(),
            settings.username.as_deref(),
        );
        let response = client
            .post(settings.url.expose_secret())
            .json(&payload)
            .send()
            .await?;
        // Chat webhooks answer with a bare "ok" and no message id.
        check_response(response).await?;
        Ok(SendReceipt::default())
    }

    fn is_enabled(&self) -> bool {
        self.settings.as_ref().is_some_and(|s| s.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serial_test::serial;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_validate_config() {
        let provider = WebhookNotificationProvider::new();
        assert!(provider.validate_config(&json!({"webhookUrl": "https://hooks.example.com/T/B"})).valid);
        assert!(provider.validate_config(&json!({"webhookUrlEnv": "HOOK"})).valid);
        assert!(!provider.validate_config(&json!({"webhookUrl": "not a url"})).valid);
        assert!(!provider.validate_config(&json!({"channel": 5})).valid);
    }

    #[tokio::test]
    #[serial]
    async fn test_url_from_env_and_test_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        std::env::set_var("AUDIOBATCH_TEST_WEBHOOK", format!("{}/hook/abc", server.uri()));
        let mut provider = WebhookNotificationProvider::new();
        let result = provider
            .test_notification(&json!({"webhookUrlEnv": "AUDIOBATCH_TEST_WEBHOOK", "channel": "#alerts"}))
            .await;
        std::env::remove_var("AUDIOBATCH_TEST_WEBHOOK");
        assert!(result.success, "{:?}", result.error);

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["channel"], "#alerts");
        assert_eq!(body["attachments"][0]["footer"], "system_alert");
    }

    #[tokio::test]
    async fn test_server_error_fails_test() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut provider = WebhookNotificationProvider::new();
        let result = provider
            .test_notification(&json!({"webhookUrl": format!("{}/hook", server.uri())}))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("500"));
    }
}
