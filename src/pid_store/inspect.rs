//! Reading the live process table.

use crate::launcher::{executable_stem, CommandSignature};
use std::path::PathBuf;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};

/// Linux truncates the kernel process name (`comm`) to this many bytes.
const COMM_MAX_LEN: usize = 15;

/// What the OS reports about a running PID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveProcess {
    pub pid: u32,
    pub name: String,
    pub exe: Option<PathBuf>,
    /// Full argv. Empty when the OS would not reveal it (other users' processes).
    pub cmd: Vec<String>,
    /// Exited but not yet reaped. Counts as dead.
    pub zombie: bool,
}

impl LiveProcess {
    /// Whether this process plausibly is the one spawned with `signature`.
    ///
    /// The program's file name must match the process name, its executable,
    /// or an argv element (interpreters put the script there). When argv is
    /// visible, every recorded argument must appear in it in order.
    pub fn matches(&self, signature: &CommandSignature) -> bool {
        let wanted = signature.program_name();
        if wanted.is_empty() {
            return false;
        }

        let name_hit = self.name == wanted
            || executable_stem(&self.name) == wanted
            || (self.name.len() == COMM_MAX_LEN && wanted.starts_with(self.name.as_str()));
        let exe_hit = self
            .exe
            .as_deref()
            .and_then(|p| p.to_str())
            .is_some_and(|p| executable_stem(p) == wanted);
        let argv_hit = self.cmd.iter().any(|arg| executable_stem(arg) == wanted);

        if !(name_hit || exe_hit || argv_hit) {
            return false;
        }
        if self.cmd.is_empty() {
            return true;
        }

        let mut live_args = self.cmd.iter();
        signature
            .args
            .iter()
            .all(|recorded| live_args.any(|live| live == recorded))
    }
}

/// Source of [`LiveProcess`] snapshots.
pub trait ProcessInspector: Send + Sync {
    /// `None` if no process with `pid` exists.
    fn inspect(&self, pid: u32) -> Option<LiveProcess>;
}

/// Reads the real process table through `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInspector;

impl ProcessInspector for SystemInspector {
    fn inspect(&self, pid: u32) -> Option<LiveProcess> {
        if pid == 0 {
            return None;
        }
        let target = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[target]),
            true,
            ProcessRefreshKind::nothing()
                .with_cmd(UpdateKind::Always)
                .with_exe(UpdateKind::Always),
        );
        let process = system.process(target)?;

        Some(LiveProcess {
            pid,
            name: process.name().to_string_lossy().into_owned(),
            exe: process.exe().map(|p| p.to_path_buf()),
            cmd: process
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect(),
            zombie: matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead),
        })
    }
}
