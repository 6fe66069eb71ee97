use anyhow::Context;
use clap::Parser;
use scholar_harvest::{logging, Config, Search};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

/// Harvest literature from several providers under one budget and merge duplicates
#[derive(Parser, Debug)]
#[command(name = "scholar-harvest", version, about)]
struct Cli {
    /// Search query
    #[arg(short, long)]
    query: String,

    /// Overall document budget (defaults to harvest.default_limit)
    #[arg(short, long)]
    limit: Option<u32>,

    /// Provider to harvest from; repeat for several (defaults to every enabled one)
    #[arg(short, long = "source", value_name = "NAME")]
    sources: Vec<String>,

    /// Skip duplicate removal
    #[arg(long)]
    keep_duplicates: bool,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// External duplicate classifier program
    #[arg(long, value_name = "PATH")]
    classifier_command: Option<PathBuf>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.classifier_command.is_some() {
        config.dedup.command = cli.classifier_command.clone();
    }
    if cli.keep_duplicates {
        config.dedup.enabled = false;
    }

    logging::init(&config.logging);
    info!("scholar-harvest {} starting", env!("CARGO_PKG_VERSION"));

    let limit = cli.limit.unwrap_or(config.harvest.default_limit);
    let results = Search::from_config(&config)
        .perform_with_config(&config, &cli.query, limit, &cli.sources)
        .await
        .context("Search failed")?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if cli.pretty {
        serde_json::to_writer_pretty(&mut out, &results)?;
    } else {
        serde_json::to_writer(&mut out, &results)?;
    }
    writeln!(out)?;

    Ok(())
}
