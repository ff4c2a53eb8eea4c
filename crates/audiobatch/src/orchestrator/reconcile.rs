//! Startup pass that repairs state left behind by a process that stopped
//! mid-job.

use chrono::Utc;
use log::{info, warn};

use super::job::JobStatus;
use crate::db::job_repo::{self, JobCounter};
use crate::db::{record_repo, Database};
use crate::error::OrchestratorError;
use crate::tracker::{FileStatus, FileStatusTracker};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records moved from in-flight or retrying back to queued.
    pub requeued: usize,
    /// Jobs that were cancelling and are now cancelled.
    pub cancelled_jobs: Vec<String>,
    /// Running jobs the caller should resume.
    pub jobs_to_resume: Vec<String>,
}

/// Requeues stale records without touching their retry budget, finalizes
/// jobs that were cancelling and lists running jobs for resumption.
pub fn reconcile_on_startup(db: &Database, tracker: &FileStatusTracker) -> Result<ReconcileReport, OrchestratorError> {
    let mut report = ReconcileReport::default();

    let stale = record_repo::list_by_status(
        db,
        &[FileStatus::Downloading, FileStatus::Processing, FileStatus::Retrying],
    )?;
    for record in stale {
        match tracker.recover(&record.id) {
            Ok(_) => report.requeued += 1,
            Err(e) => warn!("Could not requeue record {}: {}", record.id, e),
        }
    }

    for job in job_repo::list_active(db)? {
        match job.status {
            JobStatus::Cancelling => {
                let pending = record_repo::list_for_job(
                    db,
                    &job.id,
                    &[FileStatus::Discovered, FileStatus::Queued, FileStatus::Retrying],
                )?;
                let mut skipped = 0;
                for record in pending {
                    if tracker.cancel(&record.id).is_ok() {
                        skipped += 1;
                    }
                }
                job_repo::increment(db, &job.id, JobCounter::Cancelled, skipped)?;
                let summary = record_repo::error_summary(db, &job.id)?;
                job_repo::finish(db, &job.id, JobStatus::Cancelled, &summary, Utc::now())?;
                report.cancelled_jobs.push(job.id);
            }
            JobStatus::Running => report.jobs_to_resume.push(job.id),
            _ => {}
        }
    }

    info!(
        "Startup reconciliation: {} records requeued, {} jobs cancelled, {} jobs to resume",
        report.requeued,
        report.cancelled_jobs.len(),
        report.jobs_to_resume.len()
    );
    Ok(report)
}
