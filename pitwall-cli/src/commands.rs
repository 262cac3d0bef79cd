//! Command definitions and handlers.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use pitwall_core::{PitwallConfig, SessionKey, SessionProvider, SessionType};
use pitwall_pipeline::safety_car_laps;
use pitwall_storage::{
    DurableStore, LmdbCacheBackend, OrchestratorStats, ReadSource, ReadThroughCache, TableRead,
};

use crate::error::{CliError, CliResult};
use crate::provider::JsonDirProvider;

#[derive(Debug, Parser)]
#[command(name = "pitwall")]
#[command(about = "Warm and inspect the enriched session cache", long_about = None)]
#[command(version)]
pub struct Cli {
    /// TOML config file; `PITWALL_*` variables are used when absent
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory of raw session files, overriding the config
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve one session table and print a summary
    Get {
        #[arg(long)]
        season: u16,

        #[arg(long)]
        round: u8,

        /// Session type: R (race) or S (sprint)
        #[arg(long, default_value = "R")]
        session: SessionType,

        /// Measure gaps to this driver instead of the configured one
        #[arg(long)]
        reference: Option<String>,
    },

    /// Print cache statistics
    Stats,

    /// Drop cached tables for a season or a single session
    Invalidate {
        #[arg(long)]
        season: u16,

        #[arg(long, requires = "session")]
        round: Option<u8>,

        #[arg(long, requires = "round")]
        session: Option<SessionType>,
    },
}

/// Which part of the cache an `invalidate` call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidateTarget {
    Session(SessionKey),
    Season(u16),
}

impl InvalidateTarget {
    pub fn from_args(
        season: u16,
        round: Option<u8>,
        session: Option<SessionType>,
    ) -> CliResult<Self> {
        match (round, session) {
            (Some(round), Some(session)) => {
                Ok(Self::Session(SessionKey::new(season, round, session)))
            }
            (None, None) => Ok(Self::Season(season)),
            _ => Err(CliError::Usage(
                "--round and --session must be given together".to_string(),
            )),
        }
    }
}

/// Build the cache the commands run against.
pub fn open_cache(
    config: &PitwallConfig,
    data_dir: Option<PathBuf>,
) -> CliResult<ReadThroughCache<LmdbCacheBackend, JsonDirProvider>> {
    let data_dir = data_dir
        .or_else(|| config.data_dir.clone())
        .unwrap_or_else(|| PathBuf::from("data"));
    let provider = Arc::new(JsonDirProvider::new(data_dir));
    Ok(ReadThroughCache::open_lmdb(
        &config.cache,
        config.pipeline.clone(),
        provider,
    )?)
}

/// Run `command` and return what should be printed.
pub async fn run<S, P>(cache: &ReadThroughCache<S, P>, command: Command) -> CliResult<String>
where
    S: DurableStore + 'static,
    P: SessionProvider + 'static,
{
    match command {
        Command::Get {
            season,
            round,
            session,
            reference,
        } => {
            let key = SessionKey::new(season, round, session);
            let read = match reference {
                Some(driver) => cache.get_table_with_reference(key, &driver).await?,
                None => cache.get_table(key).await?,
            };
            Ok(render_read(&read))
        }
        Command::Stats => Ok(render_stats(&cache.stats().await?)),
        Command::Invalidate {
            season,
            round,
            session,
        } => match InvalidateTarget::from_args(season, round, session)? {
            InvalidateTarget::Session(key) => {
                let removed = cache.invalidate(&key).await?;
                Ok(format!(
                    "{}: {}\n",
                    key,
                    if removed { "invalidated" } else { "not cached" }
                ))
            }
            InvalidateTarget::Season(season) => {
                let removed = cache.invalidate_season(season).await?;
                Ok(format!("{}: {} session(s) invalidated\n", season, removed))
            }
        },
    }
}

fn source_label(source: ReadSource) -> &'static str {
    match source {
        ReadSource::Memory => "memory",
        ReadSource::Durable => "durable cache",
        ReadSource::Fetched => "provider",
        ReadSource::StaleFallback => "stale cache (provider failed)",
    }
}

fn join_laps(laps: &[u32]) -> String {
    if laps.is_empty() {
        return "-".to_string();
    }
    laps.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Human-readable summary of a table read.
pub fn render_read(read: &TableRead) -> String {
    let table = read.table();
    let event = table
        .laps
        .first()
        .map(|lap| lap.base.event_name.as_str())
        .unwrap_or("no laps");
    let (sc, vsc) = safety_car_laps(table);

    let mut out = String::new();
    let _ = writeln!(out, "session    {} ({})", table.key, event);
    let _ = writeln!(out, "source     {}", source_label(read.source()));
    let _ = writeln!(
        out,
        "fetched    {} ({}s ago)",
        read.fetched_at().to_rfc3339(),
        read.staleness().as_secs()
    );
    let _ = writeln!(out, "drivers    {}", table.drivers().len());
    let _ = writeln!(out, "rows       {}", table.len());
    let _ = writeln!(out, "valid      {}", table.valid_laps().count());
    let _ = writeln!(out, "rejected   {}", table.rejected_rows.len());
    let _ = writeln!(
        out,
        "reference  {}",
        table.reference_driver.as_deref().unwrap_or("-")
    );
    let _ = writeln!(out, "sc laps    {}", join_laps(&sc));
    let _ = writeln!(out, "vsc laps   {}", join_laps(&vsc));
    for warning in &table.warnings {
        let _ = writeln!(out, "warning    {}", warning);
    }
    if let Some(reason) = read.degraded_reason() {
        let _ = writeln!(out, "degraded   {}", reason);
    }
    out
}

pub fn render_stats(stats: &OrchestratorStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "durable entries   {}", stats.durable.entry_count);
    let _ = writeln!(out, "durable corrupt   {}", stats.durable.corrupt_reads);
    let _ = writeln!(out, "memory entries    {}", stats.memory.entry_count);
    let _ = writeln!(out, "memory hits       {}", stats.memory_hits);
    let _ = writeln!(out, "durable hits      {}", stats.durable_hits);
    let _ = writeln!(out, "fetches           {}", stats.fetches);
    let _ = writeln!(out, "coalesced waits   {}", stats.coalesced_waits);
    let _ = writeln!(out, "fetch failures    {}", stats.fetch_failures);
    let _ = writeln!(out, "stale fallbacks   {}", stats.stale_fallbacks);
    out
}
