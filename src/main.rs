//! Corpus Harvester main entry point
//!
//! This is the command-line interface for the corpus harvester.

use anyhow::Context;
use clap::{Parser, Subcommand};
use corpus_harvester::config::{apply_overrides, load_config_with_hash, Config, CrawlerOverrides};
use corpus_harvester::crawler::{run_harvest, Coordinator, SessionSummary};
use corpus_harvester::output::{load_statistics, print_statistics, scan_corpus, TracingSink};
use corpus_harvester::storage::{open_storage, Storage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Corpus Harvester: a polite, resumable text corpus crawler
///
/// Discovers document URLs for each configured source, fetches them under
/// per-domain politeness rules, extracts their text and saves each distinct
/// document once.
#[derive(Parser, Debug)]
#[command(name = "corpus-harvester")]
#[command(version = "1.0.0")]
#[command(about = "A polite, resumable text corpus crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover URLs, then process them until the queue drains or a budget is spent
    Run {
        /// URLs claimed per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Session wall-clock budget in seconds
        #[arg(long, value_name = "SECS")]
        max_duration: Option<u64>,

        /// Concurrent worker tasks
        #[arg(long)]
        num_threads: Option<usize>,
    },

    /// Populate the state store without processing anything
    DiscoverOnly,

    /// Print aggregate progress and exit
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    match cli.command {
        Command::Run {
            batch_size,
            max_duration,
            num_threads,
        } => {
            let overrides = CrawlerOverrides {
                batch_size,
                max_duration_secs: max_duration,
                num_threads,
            };
            let config = apply_overrides(config, &overrides)
                .context("Invalid command-line override")?;
            handle_run(config, &config_hash).await
        }
        Command::DiscoverOnly => handle_discover_only(config).await,
        Command::Status => handle_status(&config),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("corpus_harvester=info,warn"),
            1 => EnvFilter::new("corpus_harvester=debug,info"),
            2 => EnvFilter::new("corpus_harvester=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_store(config: &Config) -> anyhow::Result<Arc<dyn Storage>> {
    let path = Path::new(&config.storage.database_path);
    let storage = open_storage(path)
        .with_context(|| format!("Failed to open state store {}", path.display()))?;
    Ok(Arc::new(storage))
}

/// Handles `run`: recovery, discovery and one scheduling session
async fn handle_run(config: Config, config_hash: &str) -> anyhow::Result<()> {
    tracing::info!(
        "Sources: {}, batch size: {}, workers: {}, budget: {}s",
        config.sources.len(),
        config.crawler.batch_size,
        config.crawler.num_threads,
        config.crawler.max_duration_secs
    );

    let storage = open_store(&config)?;
    let coordinator = Coordinator::new(config, storage)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight work");
            let _ = shutdown_tx.send(true);
        }
    });

    match run_harvest(&coordinator, config_hash, Arc::new(TracingSink), shutdown_rx).await {
        Ok(summary) => {
            print_summary(&summary);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Harvest failed: {}", e);
            Err(e.into())
        }
    }
}

/// Handles `discover-only`: populates the state store and exits
async fn handle_discover_only(config: Config) -> anyhow::Result<()> {
    let storage = open_store(&config)?;
    let coordinator = Coordinator::new(config, storage)?;

    coordinator.recover().await?;
    let added = coordinator.discover().await?;

    println!("=== Discovery ===\n");
    for (source, count) in &added {
        println!("  {:<24} {} new URLs", source, count);
    }
    println!("\n✓ {} new URLs added", added.values().sum::<usize>());

    Ok(())
}

/// Handles `status`: shows statistics from the state store
fn handle_status(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let storage = open_store(config)?;
    let corpus = scan_corpus(Path::new(&config.storage.output_dir));
    let stats = load_statistics(storage.as_ref(), corpus)?;

    print_statistics(&stats);

    Ok(())
}

fn print_summary(summary: &SessionSummary) {
    println!("\n=== Session {} ===\n", summary.session_id);
    if let Some(reason) = summary.stop_reason {
        println!("  Ended:            {:?}", reason);
    }
    println!("  Elapsed:          {:.1}s", summary.elapsed.as_secs_f64());
    println!("  Batches:          {}", summary.batches);
    println!("  Processed:        {}", summary.processed);
    println!("  Saved:            {}", summary.saved);
    println!("  Duplicates:       {}", summary.duplicates);
    println!("  Failed (retry):   {}", summary.failed);
    println!("  Failed (final):   {}", summary.failed_permanent);
    println!("  Blocked:          {}", summary.blocked);
    println!("  Skipped sources:  {}", summary.skipped_unhealthy);
    println!("  Rate:             {:.2} URLs/s", summary.rate());
    println!(
        "  Corpus:           {} files, {:.1} MiB",
        summary.corpus.files,
        summary.corpus.bytes as f64 / (1024.0 * 1024.0)
    );
}
