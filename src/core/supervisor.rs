//! The run-supervision pipeline.
//!
//! baseline → spawn → heartbeat + wait (concurrently) → join → snapshot → archive.
//!
//! The heartbeat monitor is always joined before the snapshot is taken, so
//! output files are read only after the target has fully exited or been
//! killed. A run cancelled before launch never starts the target but still
//! archives. Once past the join cancellation has no further effect.

use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::domain::{RunConfig, RunOutcome, RunReport, ValidationError};

use super::archive::{archive_dir, ArchiveError};
use super::baseline;
use super::heartbeat::HeartbeatMonitor;
use super::launcher::{spawn_target, LaunchError};
use super::snapshot::{copy_newer, SnapshotSource};
use super::terminator::ProcessTerminator;

/// Errors that fail a supervised run
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Failed to create staging directory: {0}")]
    Staging(#[source] std::io::Error),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Supervise one run of `config.executable` and archive what it produced.
///
/// Stalls and cancellation are not errors: the process is killed and whatever
/// output exists is still archived. The staging tree is removed on every path.
#[instrument(skip_all, fields(executable = %config.executable.display()))]
pub async fn run_supervised(
    config: &RunConfig,
    cancel: CancellationToken,
    terminator: Arc<dyn ProcessTerminator>,
) -> Result<RunReport, RunError> {
    config.validate()?;
    let base_name = config
        .executable_stem()
        .ok_or_else(|| ValidationError::ExecutableName(config.executable.clone()))?;

    let tracked = config.tracked_paths();
    let scan_dirs = tracked.clone();
    let baseline = tokio::task::spawn_blocking(move || baseline::capture(&scan_dirs)).await?;
    info!(%baseline, "baseline captured");

    let started_at = Utc::now();
    let (outcome, exit_code) = if cancel.is_cancelled() {
        warn!("cancelled before launch, target not started");
        (RunOutcome::Cancelled, None)
    } else {
        let monitor = HeartbeatMonitor::new(config.log_file_path(), config.timeout, base_name, terminator);
        // The monitor starts only once the target exists, so any sweep it
        // makes can find the process
        let target = spawn_target(config).await?;
        let (finished_tx, finished_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor.watch(cancel, finished_rx));

        let waited = target.wait().await;
        // Raised on every wait return path, success or not
        let _ = finished_tx.send(());
        let outcome = monitor.await?;
        (outcome, waited?)
    };
    info!(%outcome, ?exit_code, "target stopped");

    let staging = TempDir::new().map_err(RunError::Staging)?;
    let staging_root = staging.path().to_path_buf();
    let sources: Vec<SnapshotSource> = config
        .tracked_dirs
        .iter()
        .zip(tracked)
        .map(|(name, path)| SnapshotSource::new(path, name.clone()))
        .collect();
    let archive_path = config.archive_path.clone();

    let (snapshot, archived) = tokio::task::spawn_blocking(move || {
        let snapshot = copy_newer(baseline, &sources, &staging_root);
        let archived = archive_dir(&staging_root, &archive_path);
        (snapshot, archived)
    })
    .await?;
    drop(staging);

    if !snapshot.is_clean() {
        warn!(failures = snapshot.errors.len(), "some output files were not collected");
    }
    let archive_path = archived?;
    info!(
        archive = %archive_path.display(),
        files = snapshot.copied.len(),
        "run output archived"
    );

    Ok(RunReport {
        outcome,
        exit_code,
        baseline,
        snapshot,
        archive_path,
        started_at,
        finished_at: Utc::now(),
    })
}
