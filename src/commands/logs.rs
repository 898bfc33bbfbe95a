use super::Context;
use crate::output::UserOutput;
use warden::state::AGGREGATE_SINK;

pub async fn run_logs(
    ctx: &Context,
    name: &str,
    tail: usize,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let supervisor = ctx.supervisor()?;
    if name != AGGREGATE_SINK {
        if let Err(e) = supervisor.registry().require(name) {
            let names: Vec<&str> = supervisor.registry().names().collect();
            if !names.is_empty() {
                out.warning("Available daemons:");
                for daemon in names {
                    out.warning(&format!("  - {}", daemon));
                }
            }
            return Err(e.into());
        }
    }

    let lines = supervisor.logger().read_tail(name, tail).await?;
    if lines.is_empty() {
        out.status(&format!("No logs available for '{}'", name));
        return Ok(());
    }

    out.status(&format!("Logs for {}:", name));
    out.status(&format!("{:-<50}", ""));
    for line in lines {
        out.status(&line);
    }
    Ok(())
}
