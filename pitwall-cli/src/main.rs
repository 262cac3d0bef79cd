//! `pitwall` binary entry point.

use std::process::ExitCode;

use clap::Parser;
use pitwall_cli::{commands, telemetry, Cli, CliResult};
use pitwall_core::PitwallConfig;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = PitwallConfig::load(cli.config.as_deref())?;
    telemetry::init_tracing(config.json_logs)?;
    tracing::debug!(
        cache_dir = %config.cache.cache_dir.display(),
        ttl_secs = config.cache.ttl_secs,
        memory_capacity = config.cache.memory_capacity,
        "Loaded configuration"
    );

    let cache = commands::open_cache(&config, cli.data_dir)?;
    let output = commands::run(&cache, cli.command).await?;
    print!("{output}");
    Ok(())
}
