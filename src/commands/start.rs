use super::Context;
use crate::output::UserOutput;
use std::sync::Arc;
use std::time::Duration;
use warden::logger::LogLevel;
use warden::state::AGGREGATE_SINK;
use warden::supervisor::{running_supervisor, InstanceGuard, SUPERVISOR_RECORD_NAME};
use warden::{
    DaemonSpec, Error, HealthMonitor, Launcher, ProcessInspector, Supervisor, SystemInspector,
    SystemLauncher,
};

/// How long `start-all --detach` waits for the background supervisor to
/// register itself.
const DETACH_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Run the supervisor in the foreground until SIGINT/SIGTERM.
pub async fn run_start_all(ctx: &Context, out: &dyn UserOutput) -> anyhow::Result<()> {
    let supervisor = Arc::new(ctx.supervisor()?);
    let instance = InstanceGuard::acquire(supervisor.layout(), supervisor.clock().now())?;

    supervisor.logger().write(
        AGGREGATE_SINK,
        LogLevel::Info,
        &format!("supervisor started (PID {})", instance.record().pid),
    );
    out.status(&format!(
        "Supervising {} daemon(s), state in {}",
        supervisor.registry().len(),
        supervisor.layout().root().display()
    ));

    install_signal_handlers(Arc::clone(&supervisor));
    HealthMonitor::new(Arc::clone(&supervisor)).run().await;

    out.status("Stopping all daemons...");
    let report = supervisor.shutdown().await;
    super::stop::print_report(&report, out);
    supervisor.logger().write(
        AGGREGATE_SINK,
        LogLevel::Info,
        &format!(
            "supervisor stopped ({} stopped, {} force-killed)",
            report.stopped.len(),
            report.force_killed.len()
        ),
    );

    let dropped = supervisor.logger().dropped_count();
    if dropped > 0 {
        out.warning(&format!("{} log line(s) could not be written", dropped));
    }
    drop(instance);
    Ok(())
}

/// Re-launch this executable as a detached supervisor and wait for it to
/// register.
pub async fn run_start_detached(ctx: &Context, out: &dyn UserOutput) -> anyhow::Result<()> {
    let config_path = ctx.config_path()?;
    let supervisor = ctx.supervisor()?;
    let layout = supervisor.layout();

    if let Some(record) = running_supervisor(layout, &SystemInspector) {
        return Err(Error::AlreadyRunning {
            pid: Some(record.pid),
        }
        .into());
    }

    let exe = std::env::current_exe()?;
    let mut args = ctx.forwarded_args(&config_path);
    args.push("start-all".to_string());
    let spec = DaemonSpec::new(SUPERVISOR_RECORD_NAME, exe.display().to_string()).with_args(args);

    let launcher = SystemLauncher::new(layout.logs_dir(), std::env::current_dir()?);
    let handle = launcher.spawn(&spec)?;
    let log_path = launcher.log_path(SUPERVISOR_RECORD_NAME);

    let deadline = tokio::time::Instant::now() + DETACH_STARTUP_TIMEOUT;
    loop {
        match running_supervisor(layout, &SystemInspector) {
            Some(record) if record.pid == handle.pid => {
                out.success(&format!("Supervisor started in background (PID {})", handle.pid));
                out.status(&format!("  Output: {}", log_path.display()));
                return Ok(());
            }
            _ => {}
        }

        let exited = SystemInspector
            .inspect(handle.pid)
            .map_or(true, |live| live.zombie);
        if exited || tokio::time::Instant::now() >= deadline {
            out.error("Background supervisor did not start");
            out.status(&format!("  See {}", log_path.display()));
            anyhow::bail!("supervisor (PID {}) failed to register", handle.pid);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// First SIGINT or SIGTERM begins a graceful shutdown. A second SIGINT exits
/// immediately and leaves daemons running; their PID records let the next
/// `start-all` pick them up.
fn install_signal_handlers(supervisor: Arc<Supervisor>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!("Failed to create SIGINT handler: {}", e);
                    None
                }
            };
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!("Failed to create SIGTERM handler: {}", e);
                    None
                }
            };

            if sigint.is_none() && sigterm.is_none() {
                tracing::warn!(
                    "No signal handlers available - supervisor can only be stopped with stop-all"
                );
                return;
            }

            let mut signal_count = 0;
            loop {
                tokio::select! {
                    _ = async {
                        if let Some(ref mut s) = sigint {
                            s.recv().await
                        } else {
                            std::future::pending::<Option<()>>().await
                        }
                    } => {
                        signal_count += 1;
                        if signal_count == 1 {
                            eprintln!("\n\nStopping daemons... (Press Ctrl+C again to quit without stopping them)");
                            supervisor.begin_shutdown();
                        } else {
                            eprintln!("\n\nQuitting, daemons left running");
                            std::process::exit(130);
                        }
                    }
                    _ = async {
                        if let Some(ref mut s) = sigterm {
                            s.recv().await
                        } else {
                            std::future::pending::<Option<()>>().await
                        }
                    } => {
                        tracing::info!("Received SIGTERM, stopping daemons gracefully");
                        supervisor.begin_shutdown();
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n\nStopping daemons...");
                supervisor.begin_shutdown();
            }
        }
    });
}
