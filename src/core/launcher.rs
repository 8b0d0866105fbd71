//! Process launcher for the supervised application.

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::domain::{RunConfig, ValidationError};

/// Errors from launching the target
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// A spawned target that has not been waited for yet
#[derive(Debug)]
pub struct LaunchedTarget {
    child: Child,
    program: String,
}

impl LaunchedTarget {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Block until the target exits, naturally or by being killed.
    ///
    /// Returns the exit code if there was one. The code is informational only;
    /// whether the process was frozen is decided by the heartbeat monitor.
    pub async fn wait(mut self) -> Result<Option<i32>, LaunchError> {
        let status = self.child.wait().await.map_err(|e| LaunchError::Wait {
            program: self.program,
            source: e,
        })?;

        info!(exit_code = ?status.code(), "target exited");
        Ok(status.code())
    }
}

/// Validate `config` and start the target with its launch arguments.
pub async fn spawn_target(config: &RunConfig) -> Result<LaunchedTarget, LaunchError> {
    config.validate()?;

    let program = config.executable.display().to_string();
    let args = config.launch_args();
    info!(program = %program, args = ?args, "launching target");

    let child = spawn(config, &args).await.map_err(|e| LaunchError::Spawn {
        program: program.clone(),
        source: e,
    })?;

    let pid = child.id().unwrap_or(0);
    info!(pid, "target started");
    Ok(LaunchedTarget { child, program })
}

/// Launch the target and block until it exits.
pub async fn launch(config: &RunConfig) -> Result<Option<i32>, LaunchError> {
    spawn_target(config).await?.wait().await
}

/// Spawn attempts while the executable is still open for writing elsewhere
const TEXT_BUSY_RETRIES: u32 = 5;

async fn spawn(config: &RunConfig, args: &[String]) -> std::io::Result<Child> {
    let mut attempt = 0;
    loop {
        let spawned = Command::new(&config.executable)
            .args(args)
            .stdin(Stdio::null())
            .spawn();
        match spawned {
            Err(e) if is_text_busy(&e) && attempt < TEXT_BUSY_RETRIES => {
                attempt += 1;
                debug!(attempt, "executable busy, retrying spawn");
                tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
            }
            other => return other,
        }
    }
}

#[cfg(unix)]
fn is_text_busy(error: &std::io::Error) -> bool {
    error.raw_os_error() == Some(nix::errno::Errno::ETXTBSY as i32)
}

#[cfg(not(unix))]
fn is_text_busy(_error: &std::io::Error) -> bool {
    false
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    fn script(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("target.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_launch_passes_reserved_flag_first() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("args.txt");
        let exe = script(temp.path(), &format!("echo \"$@\" > {}", out.display()));

        let config = RunConfig::new(
            &exe,
            Duration::from_secs(5),
            vec!["-windowed".to_string()],
            temp.path().join("out.zip"),
        );
        let code = launch(&config).await.unwrap();

        assert_eq!(code, Some(0));
        assert_eq!(
            std::fs::read_to_string(&out).unwrap().trim(),
            "-log=log.txt -windowed"
        );
    }

    #[tokio::test]
    async fn test_launch_ignores_exit_code() {
        let temp = TempDir::new().unwrap();
        let exe = script(temp.path(), "exit 3");
        let config = RunConfig::new(&exe, Duration::from_secs(5), Vec::new(), "out.zip");
        assert_eq!(launch(&config).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_launch_rejects_reserved_argument_before_spawning() {
        let temp = TempDir::new().unwrap();
        let marker = temp.path().join("ran");
        let exe = script(temp.path(), &format!("touch {}", marker.display()));
        let config = RunConfig::new(
            &exe,
            Duration::from_secs(5),
            vec!["-log=mine.txt".to_string()],
            "out.zip",
        );

        let err = launch(&config).await.unwrap_err();
        assert!(matches!(err, LaunchError::Validation(ValidationError::ReservedArgument(_))));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_spawned_target_runs_until_waited() {
        let temp = TempDir::new().unwrap();
        let marker = temp.path().join("ran");
        let exe = script(temp.path(), &format!("touch {}\nexit 4", marker.display()));
        let config = RunConfig::new(&exe, Duration::from_secs(5), Vec::new(), "out.zip");

        let target = spawn_target(&config).await.unwrap();
        assert!(target.pid().is_some());
        assert_eq!(target.wait().await.unwrap(), Some(4));
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_launch_missing_executable() {
        let config = RunConfig::new(
            "/nonexistent/stallguard-target",
            Duration::from_secs(5),
            Vec::new(),
            "out.zip",
        );
        let err = launch(&config).await.unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
