use super::Context;
use crate::output::UserOutput;
use std::time::Duration;
use warden::launcher::terminate_process;
use warden::supervisor::{running_supervisor, FileLock};
use warden::{ShutdownReport, Supervisor, SystemInspector};

/// Extra time on top of the longest grace period for a running supervisor to
/// finish its own shutdown.
const SUPERVISOR_EXIT_SLACK: Duration = Duration::from_secs(15);

/// Stop the running supervisor (if any), then stop whatever it left behind.
pub async fn run_stop_all(ctx: &Context, out: &dyn UserOutput) -> anyhow::Result<ShutdownReport> {
    let supervisor = ctx.supervisor()?;
    let layout = supervisor.layout();
    let mut from_supervisor = None;

    if let Some(record) = running_supervisor(layout, &SystemInspector) {
        out.status(&format!("Stopping supervisor (PID {})...", record.pid));
        let requested_at = supervisor.clock().now();
        terminate_process(record.pid)?;

        // The supervisor releases its lock once its shutdown sequence is done
        let wait = longest_grace_period(&supervisor) + SUPERVISOR_EXIT_SLACK;
        let _lock = FileLock::acquire(&layout.supervisor_lock(), wait).await?;
        from_supervisor = supervisor
            .last_shutdown_report()?
            .filter(|report| report.finished_at >= requested_at);
    }

    // Hold the instance lock so no supervisor starts while daemons are stopped
    let _lock = FileLock::acquire(&layout.supervisor_lock(), Duration::from_secs(1)).await?;
    out.status("Stopping all daemons...");
    let sweep = supervisor.shutdown().await;

    let report = match from_supervisor {
        Some(mut report) => {
            report.merge(sweep);
            report
        }
        None => sweep,
    };
    print_report(&report, out);
    Ok(report)
}

fn longest_grace_period(supervisor: &Supervisor) -> Duration {
    supervisor
        .registry()
        .iter()
        .map(|spec| supervisor.grace_period_for(spec))
        .max()
        .unwrap_or_default()
}

pub(crate) fn print_report(report: &ShutdownReport, out: &dyn UserOutput) {
    for name in &report.stopped {
        out.status(&format!("  + {:<30} stopped", name));
    }
    for name in &report.not_running {
        out.status(&format!("  o {:<30} not running", name));
    }
    for name in &report.force_killed {
        out.warning(&format!("  x {:<30} force-killed", name));
    }
    for name in &report.skipped {
        out.warning(&format!("  ? {:<30} skipped", name));
    }

    if report.is_clean() {
        out.success("All daemons stopped");
    } else {
        out.blank();
        out.warning(&format!(
            "{} daemon(s) did not stop cleanly; see the supervisor log for details",
            report.force_killed.len() + report.skipped.len()
        ));
    }
}
