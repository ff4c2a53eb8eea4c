//! Recovery of work interrupted by a process exit.

mod common;

use chrono::Utc;

use common::{allow, batch_config, TestHarness};

use audiobatch::config::{NotificationCondition, NotificationEvent};
use audiobatch::db::{job_repo, record_repo};
use audiobatch::orchestrator::JobOptions;
use audiobatch::tracker::{TransitionCause, TransitionDetail};
use audiobatch::{FileStatus, JobStatus};

#[tokio::test]
async fn interrupted_job_is_requeued_and_resumed() {
    let harness = TestHarness::new(batch_config(2, 1));
    harness.script.add_file("a.mp3", 1_000);
    harness.script.add_file("b.mp3", 1_000);
    let folder = harness.add_folder(allow(&["mp3"])).await;
    harness.add_channel(vec![NotificationCondition::on(NotificationEvent::SystemAlert)]);

    let options = JobOptions {
        immediate_processing: Some(false),
        ..Default::default()
    };
    let started = harness.service.start_job(&folder, options).await.unwrap();

    // State left behind by a process that died mid-download.
    let tracker = harness.service.orchestrator().tracker();
    let records = record_repo::list_for_job(&harness.db, &started.job_id, &[FileStatus::Discovered]).unwrap();
    for status in [FileStatus::Queued, FileStatus::Downloading] {
        tracker
            .transition(&records[0].id, status, TransitionCause::Pipeline, TransitionDetail::default())
            .unwrap();
    }
    job_repo::mark_running(&harness.db, &started.job_id, Utc::now()).unwrap();

    let report = harness.service.recover().await.unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(report.jobs_to_resume, vec![started.job_id.clone()]);
    assert_eq!(harness.sent_titles(), vec!["Interrupted work recovered".to_string()]);

    let job = harness
        .service
        .orchestrator()
        .wait_for_job(&started.job_id)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.counters.processed_files, 2);

    let recovered = harness.service.get_record(&records[0].id).unwrap();
    assert_eq!(recovered.status, FileStatus::Completed);
    assert_eq!(recovered.retry_count, 0);
    let causes: Vec<_> = harness
        .service
        .get_file_processing_logs(&recovered.id)
        .unwrap()
        .into_iter()
        .map(|l| l.cause)
        .collect();
    assert!(causes.iter().any(|c| c == TransitionCause::Recovery.as_str()));
}
