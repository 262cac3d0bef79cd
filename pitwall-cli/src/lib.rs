//! Pitwall CLI
//!
//! Thin front end over [`pitwall_storage::ReadThroughCache`]: loads the
//! configuration, installs logging, reads raw sessions from a directory of
//! JSON files and prints table summaries and cache statistics.

pub mod commands;
pub mod error;
pub mod provider;
pub mod telemetry;

pub use commands::{Cli, Command};
pub use error::{CliError, CliResult};
pub use provider::JsonDirProvider;
