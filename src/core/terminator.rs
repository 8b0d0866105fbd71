//! Process terminator: kill every process belonging to the target.
//!
//! The supervised application spawns helper processes under the same name
//! that are not children of the launched process, so killing by PID would
//! leave them behind. Instead every running process whose executable name
//! contains the target's base name is killed.

use sysinfo::{Pid, Signal, System};
use thiserror::Error;
use tracing::{info, warn};

/// Errors from a termination sweep
#[derive(Debug, Error)]
pub enum TerminationError {
    #[error("Failed to kill process {pid} ({name}): {reason}")]
    Kill { pid: u32, name: String, reason: String },
}

/// Kills all processes matching a base executable name
pub trait ProcessTerminator: Send + Sync {
    /// Kill every process whose executable name contains `base_name`.
    ///
    /// Best effort: a failed kill does not stop the sweep. Returns the number
    /// of processes killed, or the last error if any kill failed.
    fn terminate(&self, base_name: &str) -> Result<usize, TerminationError>;
}

/// A running process as seen by the sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    /// File name of the executable image, when readable
    pub exe_name: Option<String>,
    /// Process name as reported by the OS (truncated to 15 bytes on Linux)
    pub name: String,
}

impl ProcessEntry {
    /// Whether either name of this process contains `base_name`
    pub fn name_contains(&self, base_name: &str) -> bool {
        !base_name.is_empty()
            && (self.name.contains(base_name)
                || self.exe_name.as_deref().is_some_and(|n| n.contains(base_name)))
    }

    pub fn display_name(&self) -> &str {
        self.exe_name.as_deref().unwrap_or(&self.name)
    }
}

/// Entries whose name contains `base_name`, excluding `own_pid`
pub fn matching<'a>(
    processes: &'a [ProcessEntry],
    base_name: &'a str,
    own_pid: u32,
) -> impl Iterator<Item = &'a ProcessEntry> + 'a {
    processes
        .iter()
        .filter(move |p| p.pid != own_pid && p.name_contains(base_name))
}

/// Terminator that reads the process table through `sysinfo` and sends `SIGKILL`
#[derive(Debug, Clone, Default)]
pub struct SysinfoTerminator;

impl SysinfoTerminator {
    pub fn new() -> Self {
        Self
    }

    /// Snapshot of running processes with their executable names
    pub fn processes(&self) -> Vec<ProcessEntry> {
        entries(&refreshed_system())
    }
}

fn refreshed_system() -> System {
    let mut system = System::new();
    system.refresh_processes();
    system
}

fn entries(system: &System) -> Vec<ProcessEntry> {
    system
        .processes()
        .iter()
        .map(|(pid, process)| ProcessEntry {
            pid: pid.as_u32(),
            exe_name: process
                .exe()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned()),
            name: process.name().to_string(),
        })
        .collect()
}

impl ProcessTerminator for SysinfoTerminator {
    fn terminate(&self, base_name: &str) -> Result<usize, TerminationError> {
        let system = refreshed_system();
        let processes = entries(&system);
        let own_pid = std::process::id();

        let mut killed = 0;
        let mut last_error = None;
        for entry in matching(&processes, base_name, own_pid) {
            let sent = system
                .process(Pid::from_u32(entry.pid))
                .and_then(|process| process.kill_with(Signal::Kill));
            let reason = match sent {
                Some(true) => {
                    info!(pid = entry.pid, name = %entry.display_name(), "killed process");
                    killed += 1;
                    continue;
                }
                Some(false) => "signal not delivered",
                None => "process gone or SIGKILL unsupported",
            };
            warn!(pid = entry.pid, name = %entry.display_name(), reason, "failed to kill process");
            last_error = Some(TerminationError::Kill {
                pid: entry.pid,
                name: entry.display_name().to_string(),
                reason: reason.to_string(),
            });
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(killed),
        }
    }
}
