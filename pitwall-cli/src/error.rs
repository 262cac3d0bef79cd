//! Error type for the command-line front end.

use pitwall_core::{ConfigError, PitwallError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Pitwall(#[from] PitwallError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to initialise logging: {0}")]
    Telemetry(String),

    #[error("{0}")]
    Usage(String),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Usage(_) => 2,
            CliError::Config(_) => 3,
            CliError::Telemetry(_) => 4,
            CliError::Pitwall(_) => 1,
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;
