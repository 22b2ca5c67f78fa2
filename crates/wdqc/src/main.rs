use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use wdqc_core::check::{CheckOptions, ItemSource, RunSummary, run_check};
use wdqc_core::config::{DEFAULT_CONFIG_FILENAME, ResolvedConfig, load_config};
use wdqc_core::items::DEFAULT_BATCH_SIZE;

#[derive(Debug, Parser)]
#[command(
    name = "wdqc",
    version,
    about = "Check statement counts, constraint violations, sitelinks, and quality scores for Wikidata items"
)]
struct Cli {
    #[arg(
        short = 'i',
        long = "ifile",
        value_name = "PATH",
        required_unless_present = "random",
        conflicts_with = "random",
        help = "Read item ids from the first column of this file"
    )]
    ifile: Option<PathBuf>,
    #[arg(
        short = 'r',
        long = "random",
        value_name = "COUNT",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Check this many randomly drawn item ids instead"
    )]
    random: Option<u64>,
    #[arg(
        short = 'o',
        long = "ofile",
        value_name = "PATH",
        help = "Report destination (defaults next to the input file, or to random-<timestamp>.out.csv)"
    )]
    ofile: Option<PathBuf>,
    #[arg(
        short = 'b',
        long = "batch-size",
        value_name = "COUNT",
        default_value_t = DEFAULT_BATCH_SIZE as u64,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Items per batch of bulk API requests"
    )]
    batch_size: u64,
    #[arg(long, value_name = "PATH", help = "TOML config file (wdqc.toml by default)")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let source = match (&cli.ifile, cli.random) {
        (Some(path), None) => ItemSource::File(path.clone()),
        (None, Some(count)) => ItemSource::Random(count as usize),
        _ => unreachable!("clap enforces exactly one of --ifile and --random"),
    };

    let config = load_tool_config(&cli)?;

    let mut options = CheckOptions {
        source,
        output: cli.ofile.clone(),
        batch_size: cli.batch_size as usize,
    };
    // Pin the destination now so the random-run timestamp is taken once.
    let output = options.resolved_output();
    options.output = Some(output.clone());

    match &options.source {
        ItemSource::File(path) => println!(
            "checking quality on items from input file {}, write to {}, processing in batches of {}",
            path.display(),
            output.display(),
            options.batch_size
        ),
        ItemSource::Random(count) => println!(
            "checking quality on {count} random items, write to {}, processing in batches of {}",
            output.display(),
            options.batch_size
        ),
    }

    let summary = run_check(&options, &config)?;
    print_summary(&summary);
    Ok(())
}

fn load_tool_config(cli: &Cli) -> Result<ResolvedConfig> {
    let explicit = cli
        .config
        .clone()
        .or_else(|| std::env::var("WDQC_CONFIG").ok().map(PathBuf::from));
    if let Some(path) = &explicit
        && !path.exists()
    {
        bail!("config file not found: {}", path.display());
    }
    let path = explicit.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));
    Ok(load_config(&path)?.resolved())
}

fn print_summary(summary: &RunSummary) {
    println!("output: {}", summary.output.display());
    println!("items_requested: {}", summary.requested);
    println!("items_written: {}", summary.written);
    println!("items_skipped: {}", summary.skipped);
    println!("failed_batches: {}", summary.failed_batches);
    println!("wikidata_requests: {}", summary.wikidata_requests);
    println!("scoring_requests: {}", summary.scoring_requests);
}
