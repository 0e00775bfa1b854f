//! CLI for SeriesDB stores
//!
//! Inspects SQL store files and converts series to and from their compact
//! binary form.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use seriesdb_core::{
    CompactSeries, Metric, Series, SeriesStore, SqlSeriesStore, SqlStoreConfig, TimeRange,
    Timestamp,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// seriesdb - Embedded time-series storage engine CLI.
#[derive(Parser)]
#[command(name = "seriesdb", version, about)]
struct Cli {
    /// Path to the store database file.
    #[arg(long, global = true, default_value = "data/metrics.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// List the metrics stored in the database.
    Metrics,

    /// Print the values of a metric.
    Dump {
        /// Metric name.
        metric: String,

        /// Start of the range, epoch millis or RFC 3339.
        #[arg(long)]
        from: Option<String>,

        /// End of the range, epoch millis or RFC 3339.
        #[arg(long)]
        to: Option<String>,
    },

    /// Print count, range and aggregates of a metric.
    Stats {
        /// Metric name.
        metric: String,
    },

    /// Write the compact binary form of a metric's series.
    Compact {
        /// Metric name.
        metric: String,

        /// Output file.
        #[arg(long)]
        output: PathBuf,
    },

    /// Print a series stored in compact binary form.
    Decode {
        /// Input file.
        file: PathBuf,

        /// Timestamp the offsets in the file are relative to.
        #[arg(long)]
        base: Timestamp,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Metrics => cmd_metrics(&cli.db),
        Commands::Dump { metric, from, to } => cmd_dump(&cli.db, &metric, from, to),
        Commands::Stats { metric } => cmd_stats(&cli.db, &metric),
        Commands::Compact { metric, output } => cmd_compact(&cli.db, &metric, &output),
        Commands::Decode { file, base } => cmd_decode(&file, base),
    }
}

/// Open the SQL store backing `db`, refusing to create a new database
fn open(db: &Path) -> anyhow::Result<SqlSeriesStore> {
    if !db.is_file() {
        bail!("No store found at '{}'", db.display());
    }
    let name = db
        .file_stem()
        .and_then(|stem| stem.to_str())
        .with_context(|| format!("Invalid store file name '{}'", db.display()))?;
    let data_dir = db
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    debug!("Opening store '{}' in {}", name, data_dir.display());
    let store = SqlSeriesStore::new(SqlStoreConfig {
        data_dir,
        name: name.to_string(),
        ..Default::default()
    })?;
    Ok(store)
}

/// Look up a stored metric without creating a table for an unknown name
fn find_metric(store: &SqlSeriesStore, name: &str) -> anyhow::Result<Metric> {
    let wanted = Metric::create(name)?;
    match store.metrics()?.into_iter().find(|m| m.id() == wanted.id()) {
        Some(metric) => Ok(metric),
        None => bail!("Metric '{}' not found in store '{}'", name, store.name()),
    }
}

fn parse_time(text: &str) -> anyhow::Result<Timestamp> {
    if let Ok(millis) = text.parse::<Timestamp>() {
        return Ok(millis);
    }
    let time = DateTime::parse_from_rfc3339(text)
        .with_context(|| format!("Invalid time '{}', expected epoch millis or RFC 3339", text))?;
    Ok(time.timestamp_millis())
}

/// Implements `seriesdb metrics`.
fn cmd_metrics(db: &Path) -> anyhow::Result<()> {
    let store = open(db)?;
    let metrics = store.metrics()?;

    println!("Store: {}", db.display());
    println!("Metrics: {}", metrics.len());
    for metric in &metrics {
        let count = store.get(metric)?.count();
        println!("  {:<40} {:>10} values", metric.name(), count);
    }
    Ok(())
}

/// Implements `seriesdb dump <metric>`.
fn cmd_dump(db: &Path, metric: &str, from: Option<String>, to: Option<String>) -> anyhow::Result<()> {
    let store = open(db)?;
    let metric = find_metric(&store, metric)?;
    let range = TimeRange::new(
        from.as_deref().map(parse_time).transpose()?,
        to.as_deref().map(parse_time).transpose()?,
    );

    let series = store.get_range(&metric, range)?;
    println!("timestamp,time,value");
    for value in series.values() {
        println!(
            "{},{},{}",
            value.timestamp,
            value.at_utc().to_rfc3339(),
            value.value
        );
    }
    Ok(())
}

/// Implements `seriesdb stats <metric>`.
fn cmd_stats(db: &Path, metric: &str) -> anyhow::Result<()> {
    let store = open(db)?;
    let metric = find_metric(&store, metric)?;
    let series = store.get(&metric)?;

    println!("Metric: {} ({})", metric.display_name(), metric.id());
    println!("  Count:   {}", series.count());
    if let (Some(first), Some(last)) = (series.first(), series.last()) {
        println!("  First:   {}", first.at_utc().to_rfc3339());
        println!("  Last:    {}", last.at_utc().to_rfc3339());
    }
    let show = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.3}", v));
    println!("  Average: {}", show(series.average()));
    println!("  Minimum: {}", show(series.minimum()));
    println!("  Maximum: {}", show(series.maximum()));
    println!("  Weight:  {:.3}", series.weight());
    Ok(())
}

/// Implements `seriesdb compact <metric> --output <file>`.
fn cmd_compact(db: &Path, metric: &str, output: &Path) -> anyhow::Result<()> {
    let store = open(db)?;
    let metric = find_metric(&store, metric)?;
    let series = store.get(&metric)?;
    if series.is_empty() {
        bail!("Metric '{}' has no values", metric.name());
    }

    let compact = series.compact()?;
    std::fs::write(output, compact.as_bytes())
        .with_context(|| format!("Failed to write '{}'", output.display()))?;

    info!(
        "Wrote {} values ({} bytes) to {}",
        compact.count(),
        compact.as_bytes().len(),
        output.display()
    );
    println!("Base timestamp: {}", compact.base());
    Ok(())
}

/// Implements `seriesdb decode <file> --base <ts>`.
fn cmd_decode(file: &Path, base: Timestamp) -> anyhow::Result<()> {
    let data = std::fs::read(file).with_context(|| format!("Failed to read '{}'", file.display()))?;
    let name = file
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("series");
    let series = CompactSeries::from_bytes(name, data, base)?;

    println!("timestamp,time,value");
    for value in series.iter() {
        println!(
            "{},{},{}",
            value.timestamp,
            value.at_utc().to_rfc3339(),
            value.value
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("1700000000000").unwrap(), 1_700_000_000_000);
        assert_eq!(
            parse_time("2023-11-14T22:13:20Z").unwrap(),
            1_700_000_000_000
        );
        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn test_unknown_metric_leaves_store_untouched() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = SqlSeriesStore::open(temp_dir.path(), "metrics").unwrap();
        let cpu = Metric::create("cpu").unwrap();
        store.add(&cpu, seriesdb_core::Value::new(1, 1.0)).unwrap();

        let db = temp_dir.path().join("metrics.db");
        let reopened = open(&db).unwrap();
        assert_eq!(find_metric(&reopened, "cpu").unwrap().id(), "cpu");
        assert!(find_metric(&reopened, "missing").is_err());
        assert!(cmd_stats(&db, "missing").is_err());
        assert_eq!(reopened.metrics().unwrap().len(), 1);
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["seriesdb", "--db", "x.db", "dump", "cpu", "--from", "10"]).unwrap();
        assert_eq!(cli.db, PathBuf::from("x.db"));
        assert!(matches!(cli.command, Commands::Dump { ref from, .. } if from.as_deref() == Some("10")));
    }
}
