use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::{json, Value};
use tracing::{info_span, Instrument};

use super::condition::{condition_matches, EventMetrics};
use crate::config::{NotificationConfig, NotificationEvent};
use crate::db::{delivery_repo, notification_repo, Database};
use crate::orchestrator::job::{BatchJob, JobStatus};
use crate::providers::{Notification, ProviderRegistry};
use crate::tracker::FileProcessingRecord;

/// Outcome counts of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub matched: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Fans events out to every active channel whose conditions match. Failures
/// are logged and recorded, never returned.
pub struct NotificationDispatcher {
    db: Database,
    registry: Arc<ProviderRegistry>,
}

impl NotificationDispatcher {
    pub fn new(db: Database, registry: Arc<ProviderRegistry>) -> Self {
        Self { db, registry }
    }

    pub async fn dispatch(
        &self,
        notification: &Notification,
        metrics: Option<&EventMetrics>,
        job_id: Option<&str>,
    ) -> DispatchReport {
        let event = notification.kind;
        let channels = match notification_repo::list(&self.db, true) {
            Ok(channels) => channels,
            Err(e) => {
                warn!("Cannot load notification channels for {}: {}", event, e);
                return DispatchReport::default();
            }
        };

        let mut report = DispatchReport::default();
        for channel in channels
            .iter()
            .filter(|c| c.conditions.iter().any(|cond| condition_matches(cond, event, metrics)))
        {
            report.matched += 1;
            let span = info_span!("notify", channel = %channel.name, kind = %channel.notification_type, event = %event);
            match self.deliver(channel, notification).instrument(span).await {
                Ok(message_id) => {
                    report.delivered += 1;
                    self.record(channel, event, job_id, true, message_id.as_deref(), None);
                }
                Err(error) => {
                    report.failed += 1;
                    warn!("Notification '{}' failed for {}: {}", channel.name, event, error);
                    self.record(channel, event, job_id, false, None, Some(&error));
                }
            }
        }
        debug!(
            "Dispatched {}: {} matched, {} delivered, {} failed",
            event, report.matched, report.delivered, report.failed
        );
        report
    }

    async fn deliver(&self, channel: &NotificationConfig, notification: &Notification) -> Result<Option<String>, String> {
        let provider = self
            .registry
            .create_notification(&channel.notification_type, &channel.config)
            .await
            .map_err(|e| e.to_string())?;
        if !provider.is_enabled() {
            return Err("channel is disabled".to_string());
        }
        let receipt = provider
            .send_notification(notification)
            .await
            .map_err(|e| e.to_string())?;
        Ok(receipt.id)
    }

    fn record(
        &self,
        channel: &NotificationConfig,
        event: NotificationEvent,
        job_id: Option<&str>,
        success: bool,
        message_id: Option<&str>,
        error: Option<&str>,
    ) {
        if let Err(e) = delivery_repo::append(
            &self.db,
            &channel.id,
            event.as_str(),
            job_id,
            success,
            message_id,
            error,
        ) {
            warn!("Failed to record notification delivery: {}", e);
        }
    }

    pub async fn job_started(&self, job: &BatchJob, folder_name: &str) -> DispatchReport {
        let notification = Notification::new(
            NotificationEvent::BatchStarted,
            format!("Batch started: {}", job.name),
            format!("{} files queued from {}", job.counters.total_files, folder_name),
        )
        .with_data(job_data(job, folder_name));
        let metrics = EventMetrics::from(&job.counters);
        self.dispatch(&notification, Some(&metrics), Some(&job.id)).await
    }

    /// Always fires `batch_completed`, plus `batch_failed` or
    /// `batch_cancelled` when the job ended that way.
    pub async fn job_finished(&self, job: &BatchJob, folder_name: &str) -> DispatchReport {
        let metrics = EventMetrics::from(&job.counters);
        let data = job_data(job, folder_name);
        let summary = format!(
            "{} processed, {} failed, {} skipped of {} files",
            job.counters.processed_files,
            job.counters.failed_files,
            job.counters.skipped_files,
            job.counters.total_files
        );

        let mut events = vec![NotificationEvent::BatchCompleted];
        match job.status {
            JobStatus::Failed => events.push(NotificationEvent::BatchFailed),
            JobStatus::Cancelled => events.push(NotificationEvent::BatchCancelled),
            _ => {}
        }

        let mut total = DispatchReport::default();
        for event in events {
            let title = match event {
                NotificationEvent::BatchFailed => format!("Batch failed: {}", job.name),
                NotificationEvent::BatchCancelled => format!("Batch cancelled: {}", job.name),
                _ => format!("Batch finished: {}", job.name),
            };
            let notification = Notification::new(event, title, summary.clone()).with_data(data.clone());
            let report = self.dispatch(&notification, Some(&metrics), Some(&job.id)).await;
            total.matched += report.matched;
            total.delivered += report.delivered;
            total.failed += report.failed;
        }
        info!("Job {} finished as {}: {}", job.id, job.status, summary);
        total
    }

    pub async fn file_failed(&self, job: &BatchJob, record: &FileProcessingRecord) -> DispatchReport {
        let error_code = record.error_code.map(|c| c.as_str()).unwrap_or("UNKNOWN_ERROR");
        let notification = Notification::new(
            NotificationEvent::FileFailed,
            format!("File failed: {}", record.file_name),
            format!(
                "{} failed with {}: {}",
                record.file_name,
                error_code,
                record.error_message.as_deref().unwrap_or("no details")
            ),
        )
        .with_data(json!({
            "jobId": job.id,
            "jobName": job.name,
            "fileName": record.file_name,
            "errorCode": error_code,
            "errorMessage": record.error_message,
            "retryCount": record.retry_count,
        }));
        let metrics = EventMetrics::from(&job.counters);
        self.dispatch(&notification, Some(&metrics), Some(&job.id)).await
    }

    pub async fn system_alert(&self, title: &str, message: &str, data: Value) -> DispatchReport {
        let notification = Notification::new(NotificationEvent::SystemAlert, title, message).with_data(data);
        self.dispatch(&notification, None, None).await
    }
}

fn job_data(job: &BatchJob, folder_name: &str) -> Value {
    json!({
        "jobId": job.id,
        "jobName": job.name,
        "folderName": folder_name,
        "status": job.status,
        "totalFiles": job.counters.total_files,
        "processedFiles": job.counters.processed_files,
        "failedFiles": job.counters.failed_files,
        "skippedFiles": job.counters.skipped_files,
        "cancelledFiles": job.counters.cancelled_files,
        "errorSummary": job.error_summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NewNotification, NotificationCondition, Threshold, ThresholdMetric, ThresholdOperator};
    use crate::orchestrator::job::JobOptions;
    use crate::providers::notification::NotificationProvider;
    use crate::providers::{NotificationError, ProviderTestResult, SendReceipt, ValidationResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    type Outbox = Arc<Mutex<Vec<Notification>>>;

    struct RecordingProvider {
        outbox: Outbox,
        fail: bool,
    }

    #[async_trait]
    impl NotificationProvider for RecordingProvider {
        fn provider_type(&self) -> &'static str {
            "recording"
        }

        fn validate_config(&self, _config: &Value) -> ValidationResult {
            ValidationResult::ok()
        }

        async fn configure(&mut self, config: &Value) -> Result<(), NotificationError> {
            self.fail = config.get("fail").and_then(Value::as_bool).unwrap_or(false);
            Ok(())
        }

        async fn send_notification(&self, notification: &Notification) -> Result<SendReceipt, NotificationError> {
            if self.fail {
                return Err(NotificationError::Http { status: 500, body: "down".to_string() });
            }
            self.outbox.lock().unwrap().push(notification.clone());
            Ok(SendReceipt { id: Some("m-1".to_string()) })
        }

        fn is_enabled(&self) -> bool {
            true
        }

        async fn test_notification(&mut self, _config: &Value) -> ProviderTestResult {
            ProviderTestResult::success("ok", Value::Null)
        }
    }

    fn setup() -> (NotificationDispatcher, Database, Outbox) {
        let db = Database::open_in_memory().unwrap();
        let outbox: Outbox = Arc::default();
        let mut registry = ProviderRegistry::with_defaults();
        let sink = Arc::clone(&outbox);
        registry.register_notification(
            "recording",
            Arc::new(move || {
                Box::new(RecordingProvider { outbox: Arc::clone(&sink), fail: false }) as Box<dyn NotificationProvider>
            }),
        );
        (NotificationDispatcher::new(db.clone(), Arc::new(registry)), db, outbox)
    }

    fn add_channel(db: &Database, name: &str, config: Value, conditions: Vec<NotificationCondition>) -> String {
        let channel = NewNotification {
            notification_type: "recording".to_string(),
            name: name.to_string(),
            config,
            conditions,
            is_active: true,
        }
        .into_config();
        notification_repo::insert(db, &channel).unwrap();
        channel.id
    }

    fn finished_job(status: JobStatus, failed: u64) -> BatchJob {
        let mut job = BatchJob::new("f1", "Nightly", &JobOptions::default());
        job.status = status;
        job.counters.total_files = 4;
        job.counters.processed_files = 4 - failed;
        job.counters.failed_files = failed;
        job
    }

    #[tokio::test]
    async fn test_threshold_selects_channels() {
        let (dispatcher, db, outbox) = setup();
        add_channel(
            &db,
            "failures",
            json!({}),
            vec![NotificationCondition {
                event: NotificationEvent::BatchCompleted,
                threshold: Some(Threshold {
                    metric: ThresholdMetric::FailedFiles,
                    operator: ThresholdOperator::Gt,
                    value: 0.0,
                }),
            }],
        );

        let report = dispatcher.job_finished(&finished_job(JobStatus::Completed, 0), "Inbox").await;
        assert_eq!(report.matched, 0);

        let report = dispatcher.job_finished(&finished_job(JobStatus::Completed, 1), "Inbox").await;
        assert_eq!(report.delivered, 1);
        assert_eq!(outbox.lock().unwrap()[0].kind, NotificationEvent::BatchCompleted);
    }

    #[tokio::test]
    async fn test_failed_job_also_fires_batch_failed() {
        let (dispatcher, db, outbox) = setup();
        add_channel(
            &db,
            "all",
            json!({}),
            vec![
                NotificationCondition::on(NotificationEvent::BatchCompleted),
                NotificationCondition::on(NotificationEvent::BatchFailed),
            ],
        );
        let job = finished_job(JobStatus::Failed, 2);
        let report = dispatcher.job_finished(&job, "Inbox").await;
        assert_eq!(report.delivered, 2);

        let kinds: Vec<_> = outbox.lock().unwrap().iter().map(|n| n.kind).collect();
        assert_eq!(kinds, vec![NotificationEvent::BatchCompleted, NotificationEvent::BatchFailed]);
        assert_eq!(delivery_repo::list_for_job(&db, &job.id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delivery_failure_is_recorded_not_raised() {
        let (dispatcher, db, _) = setup();
        let id = add_channel(
            &db,
            "broken",
            json!({"fail": true}),
            vec![NotificationCondition::on(NotificationEvent::SystemAlert)],
        );
        let report = dispatcher.system_alert("Disk", "almost full", Value::Null).await;
        assert_eq!(report, DispatchReport { matched: 1, delivered: 0, failed: 1 });

        let rows = delivery_repo::list_for_notification(&db, &id, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].success);
        assert!(rows[0].error.as_deref().unwrap().contains("500"));
    }
}
