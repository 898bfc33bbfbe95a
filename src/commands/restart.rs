use super::Context;
use crate::output::UserOutput;

/// Operator restart of one daemon. A policy denial surfaces as
/// `Error::RestartDenied`.
pub async fn run_restart(ctx: &Context, name: &str, out: &dyn UserOutput) -> anyhow::Result<()> {
    let supervisor = ctx.supervisor()?;

    out.progress(&format!("Restarting {}...", name));
    match supervisor.restart(name).await {
        Ok(record) => {
            out.finish_progress(&format!(" done (PID {})", record.pid));
            Ok(())
        }
        Err(e) => {
            out.finish_progress(" failed");
            Err(e.into())
        }
    }
}
