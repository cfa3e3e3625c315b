//! Cleanup of engine processes left running after a batch.
//!
//! Only processes that started strictly after the run began are touched, so
//! an engine instance the user had open before the run is never killed.

use chrono::{DateTime, Local};
use sysinfo::{Pid, System};

use crate::logging::RunLog;

/// A running process as seen by the reaper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    /// Seconds since the Unix epoch
    pub start_time: u64,
}

/// Source of process information and the ability to terminate processes.
pub trait ProcessTable {
    fn list(&mut self) -> Vec<ProcessInfo>;

    fn terminate(&mut self, pid: u32) -> Result<(), String>;
}

/// The operating system's process table.
pub struct SystemProcessTable {
    system: System,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        SystemProcessTable { system: System::new() }
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcessTable {
    fn list(&mut self) -> Vec<ProcessInfo> {
        self.system.refresh_processes();
        self.system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessInfo {
                pid: pid.as_u32(),
                name: process.name().to_string(),
                start_time: process.start_time(),
            })
            .collect()
    }

    fn terminate(&mut self, pid: u32) -> Result<(), String> {
        match self.system.process(Pid::from_u32(pid)) {
            Some(process) if process.kill() => Ok(()),
            Some(_) => Err("kill signal was not delivered".to_string()),
            None => Err("process no longer exists".to_string()),
        }
    }
}

/// Compare executable names ignoring case and a trailing `.exe`.
fn same_executable(name: &str, wanted: &str) -> bool {
    fn normalize(name: &str) -> String {
        let name = name.to_lowercase();
        match name.strip_suffix(".exe") {
            Some(stripped) => stripped.to_string(),
            None => name,
        }
    }
    normalize(name) == normalize(wanted)
}

/// Terminate processes named in `names` that started strictly after
/// `run_started`, returning how many were terminated.
///
/// Start times are compared at one-second resolution. The current process is
/// never a candidate. Termination failures are logged and not counted.
pub fn reap_stray_processes(
    table: &mut dyn ProcessTable,
    names: &[String],
    run_started: DateTime<Local>,
    log: &RunLog,
) -> usize {
    if names.is_empty() {
        return 0;
    }
    let cutoff = run_started.timestamp().max(0) as u64;
    let own_pid = std::process::id();

    let candidates: Vec<ProcessInfo> = table
        .list()
        .into_iter()
        .filter(|p| p.pid != own_pid && p.start_time > cutoff)
        .filter(|p| names.iter().any(|wanted| same_executable(&p.name, wanted)))
        .collect();

    let mut terminated = 0;
    for process in candidates {
        match table.terminate(process.pid) {
            Ok(()) => {
                log::debug!("Terminated stray {} (pid {})", process.name, process.pid);
                terminated += 1;
            }
            Err(reason) => log.warn(&format!(
                "Could not terminate {} (pid {}): {}",
                process.name, process.pid, reason
            )),
        }
    }

    if terminated > 0 {
        log.info(&format!("Terminated {} stray engine process(es)", terminated));
    }
    terminated
}
