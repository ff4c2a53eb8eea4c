//! SMS through a form-encoded messaging API.

use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use super::{
    check_recipients, check_response, check_url, enabled_flag, string_list, template, Notification,
    NotificationProvider, SendReceipt,
};
use crate::providers::error::NotificationError;
use crate::providers::{config_str, require_object, ValidationResult};
use crate::sanitize::redact_url;
use crate::secrets::{has_config_secret, require_config_secret};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn looks_like_phone(number: &str) -> bool {
    let digits = number.strip_prefix('+').unwrap_or(number);
    (7..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

struct SmsSettings {
    api_url: String,
    account_sid: Option<String>,
    auth_token: SecretString,
    from: String,
    to: Vec<String>,
    enabled: bool,
}

/// Sends one message per recipient.
#[derive(Default)]
pub struct SmsNotificationProvider {
    client: Option<reqwest::Client>,
    settings: Option<SmsSettings>,
}

impl SmsNotificationProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationProvider for SmsNotificationProvider {
    fn provider_type(&self) -> &'static str {
        "sms"
    }

    fn validate_config(&self, config: &Value) -> ValidationResult {
        let mut errors = Vec::new();
        if require_object(config, &mut errors) {
            check_url(config, "apiUrl", &mut errors);
            if !has_config_secret(config, "authToken") {
                errors.push("authToken is required (authToken, authTokenFile or authTokenEnv)".to_string());
            }
            match config_str(config, "from") {
                Some(from) if looks_like_phone(from) => {}
                _ => errors.push("from must be a phone number".to_string()),
            }
            check_recipients(config, "to", true, &mut errors);
            for number in string_list(config, "to") {
                if !looks_like_phone(&number) {
                    errors.push(format!("'{}' is not a phone number", number));
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
        let settings = SmsSettings {
            api_url: config_str(config, "apiUrl").unwrap_or_default().to_string(),
            account_sid: config_str(config, "accountSid").map(str::to_string),
            auth_token: require_config_secret(config, "authToken")?,
            from: config_str(config, "from").unwrap_or_default().to_string(),
            to: string_list(config, "to"),
            enabled: enabled_flag(config),
        };
        self.client = Some(reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?);
        info!("SMS notifications configured via {}", redact_url(&settings.api_url));
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

        let body = template::sms_body(notification);
        let recipients = notification.recipients.clone().unwrap_or_else(|| settings.to.clone());
        let mut ids = Vec::new();

        for to in &recipients {
            let form = [("To", to.as_str()), ("From", settings.from.as_str()), ("Body", body.as_str())];
            let request = client.post(&settings.api_url).form(&form);
            let request = match &settings.account_sid {
                Some(sid) => request.basic_auth(sid, Some(settings.auth_token.expose_secret())),
                None => request.bearer_auth(settings.auth_token.expose_secret()),
            };
            let reply = check_response(request.send().await?).await.inspect_err(|e| {
                warn!("SMS to recipient {} of {} failed: {}", ids.len() + 1, recipients.len(), e);
            })?;
            if let Some(id) = reply.get("sid").or_else(|| reply.get("id")).and_then(Value::as_str) {
                ids.push(id.to_string());
            }
        }

        Ok(SendReceipt {
            id: (!ids.is_empty()).then(|| ids.join(",")),
        })
    }

    fn is_enabled(&self) -> bool {
        self.settings.as_ref().is_some_and(|s| s.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationEvent;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str) -> Value {
        json!({
            "apiUrl": format!("{}/Messages", url),
            "accountSid": "AC1",
            "authToken": "secret",
            "from": "+15550001111",
            "to": ["+15550002222", "+15550003333"],
        })
    }

    #[test]
    fn test_validate_config() {
        let provider = SmsNotificationProvider::new();
        assert!(provider.validate_config(&config("http://sms")).valid);

        let result = provider.validate_config(&json!({
            "apiUrl": "http://sms",
            "authToken": "t",
            "from": "not-a-number",
            "to": [],
        }));
        assert_eq!(result.errors.len(), 2);
    }

    #[tokio::test]
    async fn test_sends_one_form_per_recipient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Messages"))
            .and(body_string_contains("From=%2B15550001111"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sid": "SM1"})))
            .expect(2)
            .mount(&server)
            .await;

        let mut provider = SmsNotificationProvider::new();
        provider.configure(&config(&server.uri())).await.unwrap();
        let receipt = provider
            .send_notification(&Notification::new(
                NotificationEvent::FileFailed,
                "File failed",
                "call.mp3\nCONNECTION_FAILED",
            ))
            .await
            .unwrap();
        assert_eq!(receipt.id.as_deref(), Some("SM1,SM1"));

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8(requests[0].body.clone()).unwrap();
        assert!(!body.contains("%0A"));
    }
}
