//! Provider creation guarantees and automatic processing driven by monitors.

mod common;

use std::time::Duration;

use serde_json::json;
use wiremock::MockServer;

use common::{allow, batch_config, wait_until, TestHarness};

use audiobatch::config::ProcessingConfig;
use audiobatch::db::job_repo::JobFilter;
use audiobatch::providers::{DownloadErrorKind, ProviderCategory, ProviderError, ProviderRegistry};
use audiobatch::JobStatus;

#[tokio::test]
async fn s3_bad_config_fails_before_any_request() {
    let server = MockServer::start().await;
    let registry = ProviderRegistry::with_defaults();

    let err = registry
        .create_storage("s3", &json!({"region": "eu-central-1", "endpoint": server.uri()}))
        .await
        .err()
        .expect("missing bucket must be rejected");
    match err {
        ProviderError::InvalidConfig { provider_type, errors } => {
            assert_eq!(provider_type, "s3");
            assert!(errors.iter().any(|e| e.contains("bucket")));
        }
        other => panic!("unexpected error: {other}"),
    }

    let result = registry
        .test_provider(
            ProviderCategory::Storage,
            "s3",
            &json!({"bucket": "Not_A_Bucket", "region": "eu-central-1", "endpoint": server.uri()}),
        )
        .await;
    assert!(!result.success);

    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests.is_empty(), "observed {} requests", requests.len());
}

#[tokio::test]
async fn unknown_monitor_type_lists_registered_types() {
    let registry = ProviderRegistry::with_defaults();
    let result = registry
        .test_provider(ProviderCategory::Monitor, "inotify", &json!({}))
        .await;
    assert!(!result.success);
    assert_eq!(result.details["knownTypes"], json!(["polling"]));
}

fn auto_start() -> ProcessingConfig {
    ProcessingConfig {
        auto_start: true,
        ..allow(&["mp3"])
    }
}

#[tokio::test]
async fn monitored_folder_starts_a_job_for_discovered_files() {
    let mut config = batch_config(2, 0);
    config.auto_start = true;
    let harness = TestHarness::new(config);
    harness.script.add_file("a.mp3", 1_000);
    harness.script.add_file("b.mp3", 1_000);

    let folder = harness.add_folder(auto_start()).await;
    assert_eq!(harness.service.supervisor().monitored_folders().await, vec![folder.clone()]);
    assert!(harness.service.supervisor().status(&folder).await.is_some());

    let service = &harness.service;
    let finished = wait_until(Duration::from_secs(5), || {
        let jobs = service.list_jobs(&JobFilter::default()).map(|(jobs, _)| jobs).unwrap_or_default();
        async move { jobs.len() == 1 && jobs[0].status == JobStatus::Completed }
    })
    .await;
    assert!(finished, "no completed job was started by the monitor");

    let (jobs, _) = service.list_jobs(&JobFilter::default()).unwrap();
    assert_eq!(jobs[0].counters.processed_files, 2);
    assert!(jobs[0].options.only_new);

    service.shutdown().await;
    assert!(service.supervisor().monitored_folders().await.is_empty());
}

fn all_jobs(harness: &TestHarness) -> Vec<audiobatch::BatchJob> {
    harness
        .service
        .list_jobs(&JobFilter::default())
        .map(|(jobs, _)| jobs)
        .unwrap_or_default()
}

#[tokio::test(start_paused = true)]
async fn unchanged_monitored_folder_starts_no_further_jobs() {
    let mut config = batch_config(2, 0);
    config.auto_start = true;
    let harness = TestHarness::new(config);
    harness.script.add_file("a.mp3", 1_000);
    harness.script.add_file("notes.pdf", 1_000);
    harness.script.add_file("gone.mp3", 1_000);
    harness.script.fail_next("gone.mp3", &[DownloadErrorKind::NotFound]);
    harness.add_folder(auto_start()).await;

    let first_done = wait_until(Duration::from_secs(600), || {
        let jobs = all_jobs(&harness);
        async move { jobs.len() == 1 && jobs[0].status.is_terminal() }
    })
    .await;
    assert!(first_done, "the initial scan did not finish a job");
    let first = all_jobs(&harness).remove(0);
    assert_eq!(first.status, JobStatus::Failed);
    assert_eq!(first.counters.skipped_files, 1);

    // Four more polling ticks over the same listing.
    tokio::time::sleep(Duration::from_secs(125)).await;
    assert_eq!(all_jobs(&harness).len(), 1);
    assert_eq!(harness.script.attempts("gone.mp3"), 1);
    assert_eq!(harness.script.attempts("a.mp3"), 1);

    harness.script.add_file("new.mp3", 1_000);
    let second_done = wait_until(Duration::from_secs(600), || {
        let jobs = all_jobs(&harness);
        async move { jobs.len() == 2 && jobs[0].status.is_terminal() }
    })
    .await;
    assert!(second_done, "a new file did not start a job");
    let second = all_jobs(&harness).remove(0);
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.counters.total_files, 1);
    assert_eq!(second.counters.skipped_files, 0);
    assert_eq!(harness.script.attempts("new.mp3"), 1);

    harness.service.shutdown().await;
}

#[tokio::test]
async fn folders_are_not_monitored_without_both_auto_start_flags() {
    let harness = TestHarness::new(batch_config(2, 0));
    harness.script.add_file("a.mp3", 1_000);

    let folder = harness.add_folder(auto_start()).await;
    assert!(harness.service.supervisor().monitored_folders().await.is_empty());
    assert_eq!(harness.service.supervisor().start_all().await.unwrap(), 0);

    let mut config = batch_config(2, 0);
    config.auto_start = true;
    harness.service.update_batch_config(config).unwrap();
    assert_eq!(harness.service.supervisor().start_all().await.unwrap(), 1);

    harness.service.set_folder_active(&folder, false).await.unwrap();
    assert!(harness.service.supervisor().monitored_folders().await.is_empty());
}
