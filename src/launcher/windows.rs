//! Windows process control.
//!
//! Detached, console-less processes cannot be sent Ctrl-Break and sysinfo
//! does not support `Signal::Term` on Windows, so [`terminate`] ends up in
//! `TerminateProcess` just like [`force_kill`]. The grace period therefore
//! has no effect here and stops never report a forced kill.

use crate::error::{validate_pid, Error, Result};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, Signal, System};

const DETACHED_PROCESS: u32 = 0x0000_0008;
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

const ERROR_NOT_ENOUGH_MEMORY: i32 = 8;
const ERROR_OUTOFMEMORY: i32 = 14;
const ERROR_NO_PROC_SLOTS: i32 = 89;

pub(super) fn detach(cmd: &mut tokio::process::Command) {
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
}

pub(super) fn is_resource_exhaustion_code(code: i32) -> bool {
    matches!(
        code,
        ERROR_NOT_ENOUGH_MEMORY | ERROR_OUTOFMEMORY | ERROR_NO_PROC_SLOTS
    )
}

pub(super) fn terminate(pid: u32) -> Result<()> {
    with_process(pid, |process| {
        // Console-less processes cannot receive Ctrl-Break; fall back to TerminateProcess.
        process.kill_with(Signal::Term).unwrap_or_else(|| process.kill())
    })
}

pub(super) fn force_kill(pid: u32) -> Result<()> {
    with_process(pid, |process| process.kill())
}

pub(super) fn terminate_single(pid: u32) -> Result<()> {
    terminate(pid)
}

fn with_process<F>(pid: u32, signal: F) -> Result<()>
where
    F: FnOnce(&sysinfo::Process) -> bool,
{
    validate_pid(pid, "daemon")?;
    let target = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[target]),
        true,
        ProcessRefreshKind::nothing(),
    );
    let Some(process) = system.process(target) else {
        // Already gone
        return Ok(());
    };
    if signal(process) {
        Ok(())
    } else {
        Err(Error::Signal {
            pid,
            reason: "TerminateProcess failed".to_string(),
        })
    }
}
