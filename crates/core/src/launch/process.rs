use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::paths::LaunchCandidate;

pub trait Spawn: Send + Sync {
    /// Start `candidate` as an independent process. Reports only whether the
    /// OS created it; readiness is the health probe's business.
    fn spawn(&self, candidate: &LaunchCandidate) -> bool;
}

/// Starts backend processes detached from the client's stdio.
#[derive(Debug, Default, Clone)]
pub struct ProcessSupervisor {
    last_pid: Arc<AtomicU32>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// PID of the most recent successful spawn, if any.
    pub fn last_pid(&self) -> Option<u32> {
        match self.last_pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    fn build_command(candidate: &LaunchCandidate) -> Command {
        let mut cmd = Command::new(&candidate.program);
        cmd.args(&candidate.args);

        // Working directory next to the backend (for DLL / module discovery)
        if let Some(dir) = &candidate.working_dir {
            cmd.current_dir(dir);
        }

        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group: the host's signals don't reach the backend
            cmd.process_group(0);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }
}

impl Spawn for ProcessSupervisor {
    fn spawn(&self, candidate: &LaunchCandidate) -> bool {
        log::info!("Spawning backend: {}", candidate.command_line());

        let mut child = match Self::build_command(candidate).spawn() {
            Ok(child) => child,
            Err(e) => {
                log::warn!(
                    "Failed to spawn backend {}: {}",
                    candidate.program.display(),
                    e
                );
                return false;
            }
        };

        let pid = child.id();
        self.last_pid.store(pid, Ordering::SeqCst);
        log::info!("Backend spawned, PID: {}", pid);

        // Reap the child so it never lingers as a zombie
        let spawned = std::thread::Builder::new()
            .name(format!("backend-reaper-{}", pid))
            .spawn(move || match child.wait() {
                Ok(status) => log::warn!("Backend PID {} exited: {}", pid, status),
                Err(e) => log::warn!("Failed to wait for backend PID {}: {}", pid, e),
            });
        if let Err(e) = spawned {
            log::warn!("Could not start reaper thread for PID {}: {}", pid, e);
        }

        true
    }
}
