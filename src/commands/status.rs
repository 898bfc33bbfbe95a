use super::Context;
use crate::output::UserOutput;
use warden::supervisor::running_supervisor;
use warden::{StatusState, SystemInspector};

pub fn run_status(
    ctx: &Context,
    name: Option<&str>,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let supervisor = ctx.supervisor()?;
    let statuses = supervisor.status(name)?;

    if json {
        out.status(&serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    match running_supervisor(supervisor.layout(), &SystemInspector) {
        Some(record) => out.status(&format!(
            "Supervisor: running (PID {}, since {})",
            record.pid,
            record.started_at.format("%Y-%m-%d %H:%M:%S")
        )),
        None => out.status("Supervisor: not running"),
    }
    out.status(&format!("{:-<72}", ""));

    if statuses.is_empty() {
        out.status("  No daemons configured");
        return Ok(());
    }

    for status in statuses {
        let icon = match status.state {
            StatusState::Running => "+",
            StatusState::Dead => "x",
            StatusState::Denied => "!",
            StatusState::Stopped => "o",
        };
        let pid = status
            .pid
            .map(|p| format!("PID {}", p))
            .unwrap_or_else(|| "-".to_string());
        let mut line = format!(
            "  {} {:<24} {:<8} {:<12} restarts/h: {}",
            icon, status.name, status.state, pid, status.restarts_in_last_hour
        );
        if let Some(reason) = status.last_denial {
            line.push_str(&format!(" (last restart denied: {})", reason));
        }
        out.status(&line);
    }

    Ok(())
}
