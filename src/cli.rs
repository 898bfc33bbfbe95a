use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Warden - Keep long-running daemons alive without restart storms")]
pub struct Cli {
    /// Config file path (defaults to warden.yaml, searched upwards)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// State directory (overrides `state_dir` from the config)
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start supervising every configured daemon
    StartAll {
        /// Run the supervisor in the background and return immediately
        #[arg(short, long)]
        detach: bool,
    },
    /// Stop the supervisor and every daemon
    StopAll,
    /// Show daemon status
    Status {
        /// Only show this daemon
        name: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Restart a daemon (subject to restart limits)
    Restart {
        /// Daemon name
        name: String,
    },
    /// Show a daemon's log
    Logs {
        /// Daemon name, or `supervisor` for the decision log
        name: String,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value_t = warden::logger::DEFAULT_TAIL_LINES)]
        tail: usize,
    },
    /// Validate the configuration file
    Validate,
}
