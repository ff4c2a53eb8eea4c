//! Batch orchestration: admission, the per-job worker pool, retries with
//! backoff, cancellation and startup recovery.

pub mod admission;
pub mod analysis;
pub mod backoff;
pub mod batch_orchestrator;
pub mod job;
pub mod reconcile;
pub mod runner;

pub use admission::{Admission, AdmissionFilter};
pub use analysis::{AnalysisError, AnalysisOutcome, Analyzer, FileMetadata, HttpAnalyzer};
pub use batch_orchestrator::{BatchOrchestrator, ScannedFile, StartedJob};
pub use job::{BatchJob, JobCounters, JobOptions, JobStatus};
pub use reconcile::{reconcile_on_startup, ReconcileReport};
