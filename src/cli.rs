use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use clap::{Args, Parser, Subcommand};
use measurements_core::history::aggregation::{Aggregation, MissingValueStrategy};
use measurements_core::history::interval::Interval;
use measurements_core::history::timezone::parse_timezone;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "measurements-core",
    version,
    about = "Measurement ingest and history queries against Postgres and Redis"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest a JSON file of measurement batches ("-" reads stdin).
    Ingest(IngestArgs),
    /// Bucketed history of one variable.
    History(HistoryArgs),
    /// Newest value of one variable.
    Latest(LatestArgs),
    /// Cached last values and liveness markers of a project.
    Current(CurrentArgs),
}

#[derive(Args)]
pub struct IngestArgs {
    pub file: PathBuf,
    #[arg(long, default_value_t = false)]
    pub skip_dedup: bool,
}

#[derive(Args)]
pub struct HistoryArgs {
    #[arg(long)]
    pub project: String,
    #[arg(long)]
    pub variable: String,
    #[arg(long, value_parser = parse_rfc3339_ts)]
    pub start: DateTime<Utc>,
    #[arg(long, value_parser = parse_rfc3339_ts)]
    pub end: DateTime<Utc>,
    #[arg(long, default_value = "1h")]
    pub interval: Interval,
    #[arg(long, default_value = "avg")]
    pub aggregation: Aggregation,
    #[arg(long, default_value = "none")]
    pub missing: MissingValueStrategy,
    #[arg(long, default_value = "Europe/Vienna", value_parser = parse_tz)]
    pub timezone: Tz,
    /// Print `[[unix_seconds, value], ..]` instead of data points.
    #[arg(long, default_value_t = false)]
    pub wire: bool,
}

#[derive(Args)]
pub struct LatestArgs {
    #[arg(long)]
    pub project: String,
    #[arg(long)]
    pub variable: String,
    #[arg(long, value_parser = parse_rfc3339_ts)]
    pub before: Option<DateTime<Utc>>,
}

#[derive(Args)]
pub struct CurrentArgs {
    pub project: String,
}

fn parse_rfc3339_ts(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid RFC3339 timestamp: {raw}"))?;
    Ok(parsed.with_timezone(&Utc))
}

fn parse_tz(raw: &str) -> Result<Tz> {
    Ok(parse_timezone(raw)?)
}
