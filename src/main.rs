mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use warden::Error as WardenError;

/// Exit code when `stop-all` had to force-kill or skip a daemon.
const EXIT_UNCLEAN_STOP: i32 = 2;

/// Exit code when the restart policy refused an operator restart.
const EXIT_RESTART_DENIED: i32 = 3;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            if let Some(warden_error) = e.downcast_ref::<WardenError>() {
                eprintln!("Error: {}", warden_error);
                if let Some(suggestion) = warden_error.suggestion() {
                    eprintln!("\nHint: {}", suggestion);
                }
                if matches!(warden_error, WardenError::RestartDenied { .. }) {
                    std::process::exit(EXIT_RESTART_DENIED);
                }
            } else {
                eprintln!("Error: {:#}", e);
            }
            std::process::exit(1);
        }
    }
}

async fn run() -> anyhow::Result<i32> {
    // A daemon that invokes warden would supervise itself recursively
    if let Ok(daemon) = std::env::var(warden::launcher::DAEMON_NAME_ENV) {
        if daemon != warden::supervisor::SUPERVISOR_RECORD_NAME {
            eprintln!(
                "Error: warden was invoked from inside daemon '{}'. Run the daemon's program directly instead.",
                daemon
            );
            return Ok(1);
        }
    }

    let cli = Cli::parse();
    init_tracing()?;

    let out = output::CliOutput;
    let ctx = commands::Context::new(cli.config.clone(), cli.state_dir.clone());

    match cli.command {
        Commands::Validate => {
            commands::run_validate(&ctx, &out)?;
            Ok(0)
        }
        Commands::StartAll { detach } => {
            if detach {
                commands::run_start_detached(&ctx, &out).await?;
            } else {
                commands::run_start_all(&ctx, &out).await?;
            }
            Ok(0)
        }
        Commands::StopAll => {
            let report = commands::run_stop_all(&ctx, &out).await?;
            Ok(if report.is_clean() { 0 } else { EXIT_UNCLEAN_STOP })
        }
        Commands::Status { name, json } => {
            commands::run_status(&ctx, name.as_deref(), json, &out)?;
            Ok(0)
        }
        Commands::Restart { name } => {
            commands::run_restart(&ctx, &name, &out).await?;
            Ok(0)
        }
        Commands::Logs { name, tail } => {
            commands::run_logs(&ctx, &name, tail, &out).await?;
            Ok(0)
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
