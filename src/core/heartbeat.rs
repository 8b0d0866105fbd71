//! Heartbeat monitor: detect a frozen application from its log file.
//!
//! The monitor polls the log file's modification time once per stall window
//! instead of subscribing to file-watch events, so coarse filesystem
//! timestamps cannot produce a false "advanced" between two close writes.
//!
//! States: armed (ticking) → terminating (stall, unreadable log, or
//! cancellation) → stopped. The run-finished signal moves straight from armed
//! to stopped without touching the terminator.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{RunOutcome, StallReason};

use super::terminator::ProcessTerminator;

/// What one tick concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// The log moved since the last check
    Advanced,
    /// The application looks frozen
    Stalled(StallReason),
}

/// Last observation of the log file. Owned and mutated only by the monitor.
#[derive(Debug, Clone)]
pub struct HeartbeatState {
    /// Modification time seen at the last successful check
    pub last_modified: Option<SystemTime>,

    /// Wall-clock time of the last check
    pub last_check: SystemTime,
}

impl HeartbeatState {
    /// Initial state, recording the log's current mtime if it already exists
    pub fn arm(log_path: &Path) -> Self {
        Self {
            last_modified: modified(log_path).ok(),
            last_check: SystemTime::now(),
        }
    }

    /// Fold in one stat result
    pub fn observe(&mut self, stat: std::io::Result<SystemTime>) -> Tick {
        self.last_check = SystemTime::now();
        match stat {
            Err(_) => Tick::Stalled(StallReason::LogUnreadable),
            Ok(mtime) if self.last_modified == Some(mtime) => Tick::Stalled(StallReason::LogUnchanged),
            Ok(mtime) => {
                self.last_modified = Some(mtime);
                Tick::Advanced
            }
        }
    }
}

fn modified(path: &Path) -> std::io::Result<SystemTime> {
    std::fs::metadata(path)?.modified()
}

/// Watches one run's log file and kills the target when it freezes
pub struct HeartbeatMonitor {
    log_path: PathBuf,
    window: Duration,
    base_name: String,
    terminator: Arc<dyn ProcessTerminator>,
    armed: HeartbeatState,
}

impl HeartbeatMonitor {
    /// Create a monitor, arming it with the log's mtime as of now
    pub fn new(
        log_path: impl Into<PathBuf>,
        window: Duration,
        base_name: impl Into<String>,
        terminator: Arc<dyn ProcessTerminator>,
    ) -> Self {
        let log_path = log_path.into();
        let armed = HeartbeatState::arm(&log_path);
        Self {
            log_path,
            window,
            base_name: base_name.into(),
            terminator,
            armed,
        }
    }

    /// Run until the target finishes, freezes, or is cancelled.
    ///
    /// `finished` must be fired by whoever observes the launcher returning.
    /// A dropped sender counts as finished, so the monitor never outlives
    /// the run. The terminator is invoked at most once.
    pub async fn watch(
        self,
        cancel: CancellationToken,
        mut finished: oneshot::Receiver<()>,
    ) -> RunOutcome {
        info!(
            log = %self.log_path.display(),
            window_ms = self.window.as_millis() as u64,
            "watching log heartbeat"
        );

        let mut state = self.armed.clone();
        let mut ticker = interval_at(Instant::now() + self.window, self.window);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                biased;

                _ = &mut finished => {
                    debug!("target finished, heartbeat stopped");
                    return RunOutcome::Completed;
                }
                _ = cancel.cancelled() => {
                    warn!("cancellation requested, terminating target");
                    break RunOutcome::Cancelled;
                }
                _ = ticker.tick() => {
                    match state.observe(modified(&self.log_path)) {
                        Tick::Advanced => debug!("log advanced"),
                        Tick::Stalled(reason) => {
                            warn!(
                                log = %self.log_path.display(),
                                ?reason,
                                window_ms = self.window.as_millis() as u64,
                                "log heartbeat stalled, terminating target"
                            );
                            break RunOutcome::TimedOut { reason };
                        }
                    }
                }
            }
        };

        self.terminate().await;
        outcome
    }

    async fn terminate(&self) {
        let terminator = Arc::clone(&self.terminator);
        let base_name = self.base_name.clone();
        let result = tokio::task::spawn_blocking(move || terminator.terminate(&base_name)).await;

        match result {
            Ok(Ok(killed)) => info!(killed, base_name = %self.base_name, "termination sweep finished"),
            Ok(Err(e)) => warn!(error = %e, "termination sweep incomplete"),
            Err(e) => warn!(error = %e, "termination sweep panicked"),
        }
    }
}
