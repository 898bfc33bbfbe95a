use crate::error::{validate_pid, Error, Result};
use nix::errno::Errno;
use nix::sys::signal::{self, killpg, Signal};
use nix::unistd::{getpgid, Pid};

pub(super) fn detach(cmd: &mut tokio::process::Command) {
    // SAFETY: pre_exec runs after fork() and before exec() in the child, where
    // only async-signal-safe functions may be called. setsid() is a single
    // async-signal-safe syscall; the closure captures nothing and allocates nothing.
    // A freshly forked child is never a process group leader, so setsid()
    // succeeds and the daemon leads a new session and process group.
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid()
                .map(|_| ())
                .map_err(std::io::Error::from)
        });
    }
}

pub(super) fn is_resource_exhaustion_code(code: i32) -> bool {
    matches!(
        Errno::from_raw(code),
        Errno::EAGAIN | Errno::ENOMEM | Errno::EMFILE | Errno::ENFILE
    )
}

pub(super) fn terminate(pid: u32) -> Result<()> {
    signal_group(pid, Signal::SIGTERM)
}

pub(super) fn force_kill(pid: u32) -> Result<()> {
    signal_group(pid, Signal::SIGKILL)
}

pub(super) fn terminate_single(pid: u32) -> Result<()> {
    let target = Pid::from_raw(validate_pid(pid, "supervisor")?);
    signal::kill(target, Signal::SIGTERM).map_err(|e| Error::Signal {
        pid,
        reason: e.to_string(),
    })
}

/// Signal the daemon's whole process group when it leads one, so helpers it
/// forked go down with it. Otherwise signal just the PID: the group may be
/// shared with unrelated processes, including the supervisor itself.
fn signal_group(pid: u32, sig: Signal) -> Result<()> {
    let target = Pid::from_raw(validate_pid(pid, "daemon")?);

    let leads_group = getpgid(Some(target)).is_ok_and(|pgid| pgid == target);
    let result = if leads_group {
        killpg(target, sig).or_else(|e| {
            tracing::debug!("killpg failed for PGID {}: {}, trying individual PID", pid, e);
            signal::kill(target, sig)
        })
    } else {
        signal::kill(target, sig)
    };

    match result {
        Ok(()) => Ok(()),
        // Already gone
        Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(Error::Signal {
            pid,
            reason: format!("{} failed: {}", sig, e),
        }),
    }
}
