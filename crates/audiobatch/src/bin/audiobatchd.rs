use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::Notify;

use audiobatch::config::load_settings;
use audiobatch::logging::init_logging;
use audiobatch::BatchService;

/// Settings path from the first argument, `AUDIOBATCH_CONFIG`, or
/// `~/.audiobatch/audiobatch.yaml`.
fn settings_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("AUDIOBATCH_CONFIG").map(PathBuf::from))
        .or_else(|| dirs::home_dir().map(|h| h.join(".audiobatch").join("audiobatch.yaml")))
}

async fn run() -> audiobatch::Result<()> {
    let path = settings_path().ok_or_else(|| audiobatch::ConfigError::Validation {
        message: "no settings path given and no home directory".to_string(),
    })?;
    let settings = load_settings(&path)?;
    init_logging(&settings.logging)?;
    info!("Starting audiobatchd v{} with {}", env!("CARGO_PKG_VERSION"), path.display());

    let service = BatchService::from_settings(&settings)?;

    let report = service.recover().await?;
    info!(
        "Startup recovery: {} records requeued, {} jobs cancelled, {} jobs resumed",
        report.requeued,
        report.cancelled_jobs.len(),
        report.jobs_to_resume.len()
    );

    let started = service.supervisor().start_all().await?;
    info!("Monitoring {} folders", started);

    let shutdown = Arc::new(Notify::new());
    let handler = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C, initiating shutdown...");
        handler.notify_one();
    }) {
        warn!("Could not install Ctrl+C handler: {}", e);
    }
    shutdown.notified().await;

    service.shutdown().await;
    for job_id in service.active_jobs()? {
        if service.orchestrator().is_running(&job_id) {
            info!("Job {} left running; it resumes on next start", job_id);
        }
    }
    info!("audiobatchd stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("audiobatchd: {}", e);
            ExitCode::FAILURE
        }
    }
}
