//! Configuration parsing and types.
//!
//! - `types` - Root config structure (`Config`)
//! - `daemon` - Per-daemon configuration (`DaemonSpec`, `RestartLimitsConfig`, `LogConfig`)
//! - `duration` - Human-readable duration strings
//! - `parser` - YAML config discovery and parsing
//! - `validation` - Config validation

mod daemon;
mod duration;
mod parser;
mod types;
mod validation;

pub use daemon::*;
pub use duration::*;
pub use parser::*;
pub use types::*;
pub use validation::*;
