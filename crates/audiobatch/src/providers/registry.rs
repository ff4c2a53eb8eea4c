//! Maps provider type strings to constructors and hands back providers that
//! have passed validation and their own connectivity check.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info};
use serde_json::{json, Value};

use super::clock::{Clock, SystemClock};
use super::error::ProviderError;
use super::monitor::{MonitorProvider, PollingMonitorProvider};
use super::notification::{
    EmailNotificationProvider, NotificationProvider, SmsNotificationProvider, WebhookNotificationProvider,
};
use super::storage::{LocalStorageProvider, ObjectStoreProvider, StorageProvider};
use super::{ProviderCategory, ProviderTestResult, ValidationResult};

pub type StorageConstructor = Arc<dyn Fn() -> Box<dyn StorageProvider> + Send + Sync>;
pub type MonitorConstructor =
    Arc<dyn Fn(Option<Arc<dyn StorageProvider>>, Arc<dyn Clock>) -> Box<dyn MonitorProvider> + Send + Sync>;
pub type NotificationConstructor = Arc<dyn Fn() -> Box<dyn NotificationProvider> + Send + Sync>;

pub struct ProviderRegistry {
    storage: BTreeMap<String, StorageConstructor>,
    monitor: BTreeMap<String, MonitorConstructor>,
    notification: BTreeMap<String, NotificationConstructor>,
    clock: Arc<dyn Clock>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            storage: BTreeMap::new(),
            monitor: BTreeMap::new(),
            notification: BTreeMap::new(),
            clock,
        }
    }

    /// All built-in providers on the system clock.
    pub fn with_defaults() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// All built-in providers on the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let mut registry = Self::new(clock);
        registry.register_storage("local", Arc::new(|| Box::new(LocalStorageProvider::new()) as Box<dyn StorageProvider>));
        registry.register_storage("s3", Arc::new(|| Box::new(ObjectStoreProvider::new()) as Box<dyn StorageProvider>));
        registry.register_monitor(
            "polling",
            Arc::new(|storage, clock| {
                Box::new(PollingMonitorProvider::new(storage, clock)) as Box<dyn MonitorProvider>
            }),
        );
        registry.register_notification("email", Arc::new(|| Box::new(EmailNotificationProvider::new()) as Box<dyn NotificationProvider>));
        registry.register_notification("sms", Arc::new(|| Box::new(SmsNotificationProvider::new()) as Box<dyn NotificationProvider>));
        registry.register_notification("webhook", Arc::new(|| Box::new(WebhookNotificationProvider::new()) as Box<dyn NotificationProvider>));
        registry
    }

    /// Registers or replaces a storage type.
    pub fn register_storage(&mut self, provider_type: &str, constructor: StorageConstructor) {
        self.storage.insert(provider_type.to_string(), constructor);
    }

    pub fn register_monitor(&mut self, provider_type: &str, constructor: MonitorConstructor) {
        self.monitor.insert(provider_type.to_string(), constructor);
    }

    pub fn register_notification(&mut self, provider_type: &str, constructor: NotificationConstructor) {
        self.notification.insert(provider_type.to_string(), constructor);
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Registered type names of a category, sorted.
    pub fn known_types(&self, category: ProviderCategory) -> Vec<String> {
        match category {
            ProviderCategory::Storage => self.storage.keys().cloned().collect(),
            ProviderCategory::Monitor => self.monitor.keys().cloned().collect(),
            ProviderCategory::Notification => self.notification.keys().cloned().collect(),
        }
    }

    fn not_found(&self, category: ProviderCategory, provider_type: &str) -> ProviderError {
        ProviderError::NotFound {
            category,
            provider_type: provider_type.to_string(),
            known: self.known_types(category),
        }
    }

    fn lookup<'a, T>(
        &self,
        map: &'a BTreeMap<String, T>,
        category: ProviderCategory,
        provider_type: &str,
    ) -> Result<&'a T, ProviderError> {
        map.get(provider_type)
            .ok_or_else(|| self.not_found(category, provider_type))
    }

    fn check(provider_type: &str, result: ValidationResult) -> Result<(), ProviderError> {
        if result.valid {
            Ok(())
        } else {
            Err(ProviderError::InvalidConfig {
                provider_type: provider_type.to_string(),
                errors: result.errors,
            })
        }
    }

    fn connection_failed(provider_type: &str, e: impl std::fmt::Display) -> ProviderError {
        ProviderError::ConnectionFailed {
            provider_type: provider_type.to_string(),
            message: e.to_string(),
        }
    }

    /// Lookup and config validation only. Never performs I/O.
    pub fn validate_config(
        &self,
        category: ProviderCategory,
        provider_type: &str,
        config: &Value,
    ) -> Result<ValidationResult, ProviderError> {
        let result = match category {
            ProviderCategory::Storage => {
                (self.lookup(&self.storage, category, provider_type)?)().validate_config(config)
            }
            ProviderCategory::Monitor => {
                (self.lookup(&self.monitor, category, provider_type)?)(None, self.clock()).validate_config(config)
            }
            ProviderCategory::Notification => {
                (self.lookup(&self.notification, category, provider_type)?)().validate_config(config)
            }
        };
        Ok(result)
    }

    pub async fn create_storage(
        &self,
        provider_type: &str,
        config: &Value,
    ) -> Result<Box<dyn StorageProvider>, ProviderError> {
        let constructor = self.lookup(&self.storage, ProviderCategory::Storage, provider_type)?;
        let mut provider = constructor();
        Self::check(provider_type, provider.validate_config(config))?;
        provider
            .connect(config)
            .await
            .map_err(|e| Self::connection_failed(provider_type, e))?;
        debug!("Created {} storage provider", provider_type);
        Ok(provider)
    }

    /// Builds a monitor bound to an already-connected storage provider.
    pub async fn create_monitor(
        &self,
        provider_type: &str,
        config: &Value,
        storage: Arc<dyn StorageProvider>,
    ) -> Result<Box<dyn MonitorProvider>, ProviderError> {
        let constructor = self.lookup(&self.monitor, ProviderCategory::Monitor, provider_type)?;
        let mut provider = constructor(Some(storage), self.clock());
        Self::check(provider_type, provider.validate_config(config))?;
        provider
            .configure(config)
            .await
            .map_err(|e| Self::connection_failed(provider_type, e))?;
        debug!("Created {} monitor provider", provider_type);
        Ok(provider)
    }

    pub async fn create_notification(
        &self,
        provider_type: &str,
        config: &Value,
    ) -> Result<Box<dyn NotificationProvider>, ProviderError> {
        let constructor = self.lookup(&self.notification, ProviderCategory::Notification, provider_type)?;
        let mut provider = constructor();
        Self::check(provider_type, provider.validate_config(config))?;
        provider
            .configure(config)
            .await
            .map_err(|e| Self::connection_failed(provider_type, e))?;
        debug!("Created {} notification provider", provider_type);
        Ok(provider)
    }

    /// Runs the create steps and reports instead of failing. A monitor is
    /// configured without storage, so no scan happens.
    pub async fn test_provider(
        &self,
        category: ProviderCategory,
        provider_type: &str,
        config: &Value,
    ) -> ProviderTestResult {
        let outcome = match category {
            ProviderCategory::Storage => match self.create_storage(provider_type, config).await {
                Ok(provider) => Ok(provider.test_connection().await),
                Err(e) => Err(e),
            },
            ProviderCategory::Monitor => match self.lookup(&self.monitor, category, provider_type) {
                Ok(constructor) => {
                    let mut provider = constructor(None, self.clock());
                    match Self::check(provider_type, provider.validate_config(config)) {
                        Ok(()) => match provider.configure(config).await {
                            Ok(()) => Ok(ProviderTestResult::success(
                                format!("{} monitor configuration is valid", provider_type),
                                Value::Null,
                            )),
                            Err(e) => Err(Self::connection_failed(provider_type, e)),
                        },
                        Err(e) => Err(e),
                    }
                }
                Err(e) => Err(e),
            },
            ProviderCategory::Notification => match self.create_notification(provider_type, config).await {
                Ok(_) => Ok(ProviderTestResult::success(
                    format!("{} notification provider configured", provider_type),
                    Value::Null,
                )),
                Err(e) => Err(e),
            },
        };

        match outcome {
            Ok(result) => {
                info!(
                    "Provider test {}/{}: {}",
                    category,
                    provider_type,
                    if result.success { "ok" } else { "failed" }
                );
                result
            }
            Err(e) => ProviderTestResult::failure(e.to_string(), error_details(&e)),
        }
    }

    /// Storage test plus a real scan through the monitor.
    pub async fn test_monitor(
        &self,
        provider_type: &str,
        config: &Value,
        storage: Arc<dyn StorageProvider>,
    ) -> ProviderTestResult {
        match self.create_monitor(provider_type, config, storage).await {
            Ok(monitor) => monitor.test_monitoring(config).await,
            Err(e) => ProviderTestResult::failure(e.to_string(), error_details(&e)),
        }
    }

    /// Creates the notification provider and sends its test message.
    pub async fn test_notification(&self, provider_type: &str, config: &Value) -> ProviderTestResult {
        match self.lookup(&self.notification, ProviderCategory::Notification, provider_type) {
            Ok(constructor) => constructor().test_notification(config).await,
            Err(e) => ProviderTestResult::failure(e.to_string(), error_details(&e)),
        }
    }
}

fn error_details(e: &ProviderError) -> Value {
    match e {
        ProviderError::NotFound { known, .. } => json!({"stage": "lookup", "knownTypes": known}),
        ProviderError::InvalidConfig { errors, .. } => json!({"stage": "validate", "errors": errors}),
        ProviderError::ConnectionFailed { .. } => json!({"stage": "connect"}),
    }
}
