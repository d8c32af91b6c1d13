//! Image Trawler main entry point
//!
//! This is the command-line interface for the Image Trawler harvesting engine.

use anyhow::{bail, Context};
use clap::Parser;
use image_trawler::config::{load_config_with_hash, resolve_credential, Config};
use image_trawler::crawler::{CrawlRequest, RunRegistry, RunState};
use image_trawler::output::{load_statistics, print_run_report, print_statistics};
use image_trawler::storage::open_storage;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Image Trawler: a polite image harvesting engine
///
/// Image Trawler fetches search pages or API responses from a configured
/// source, extracts candidate image URLs, verifies they are images, and
/// records and downloads the new ones without ever storing a URL twice.
#[derive(Parser, Debug)]
#[command(name = "image-trawler")]
#[command(version)]
#[command(about = "A polite image harvesting engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Name of the configured source to crawl
    #[arg(short, long, required_unless_present_any = ["stats", "dry_run"])]
    source: Option<String>,

    /// Search query sent to the source
    #[arg(long, required_unless_present_any = ["stats", "dry_run"])]
    query: Option<String>,

    /// Candidates processed per unit (defaults to the configured value)
    #[arg(long)]
    max_links: Option<usize>,

    /// Starting cursor (page or offset, source-dependent)
    #[arg(long, default_value_t = 0)]
    cursor: u64,

    /// Number of units to run, advancing the cursor each time
    #[arg(long, default_value_t = 1)]
    loops: u32,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the catalog and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config, cli.source.as_deref())
    } else if cli.stats {
        handle_stats(&config)
    } else {
        handle_crawl(config, &cli).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("image_trawler=info,warn"),
            1 => EnvFilter::new("image_trawler=debug,info"),
            2 => EnvFilter::new("image_trawler=trace,debug"),
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

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config, source: Option<&str>) -> anyhow::Result<()> {
    println!("=== Image Trawler Dry Run ===\n");

    println!("Crawler Configuration:");
    println!(
        "  Rate limit interval: {}ms",
        config.crawler.rate_limit_interval_ms
    );
    println!("  Max attempts: {}", config.crawler.max_attempts);
    println!(
        "  Backoff base: {}ms (+ up to {}ms jitter)",
        config.crawler.backoff_base_ms, config.crawler.max_jitter_ms
    );
    println!(
        "  Candidate delay: {}-{}ms",
        config.crawler.candidate_delay_min_ms, config.crawler.candidate_delay_max_ms
    );
    println!("  Default max links: {}", config.crawler.default_max_links);
    if let Some(attempts) = config.crawler.download_max_attempts {
        println!("  Download max attempts: {}", attempts);
    }
    println!("  Resume pending: {}", config.crawler.resume_pending);
    println!(
        "  Stale download after: {}s",
        config.crawler.stale_download_secs
    );

    println!("\nIdentity:");
    println!("  User agents: {}", config.identity.user_agents.len());
    println!(
        "  Spoof forwarded-for: {}",
        config.identity.spoof_forwarded_for
    );

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);
    println!("  Blob root: {}", config.storage.blob_root);

    println!(
        "\nExtraction: {} patterns, {} wrapper params, {} noise markers",
        config.extraction.patterns.len(),
        config.extraction.wrapper_params.len(),
        config.extraction.noise.len()
    );

    println!("\nSources ({}):", config.sources.len());
    for entry in &config.sources {
        println!("  - {} ({:?} {})", entry.name, entry.method, entry.url);
    }

    if let Some(name) = source {
        let entry = config
            .source(name)
            .with_context(|| format!("unknown source '{}'", name))?;
        resolve_credential(entry)?;
        println!("\n✓ Source '{}' is ready", name);
    }

    println!("\n✓ Configuration is valid");

    Ok(())
}

/// Handles the --stats mode: shows statistics from the catalog
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let storage = open_storage(Path::new(&config.storage.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation
///
/// Ctrl-C requests a stop; the run finishes its current candidate and the
/// final status is printed either way.
async fn handle_crawl(config: Config, cli: &Cli) -> anyhow::Result<()> {
    let (Some(source), Some(query)) = (cli.source.clone(), cli.query.clone()) else {
        bail!("--source and --query are required to crawl");
    };

    let storage = open_storage(Path::new(&config.storage.database_path))?;
    let registry = RunRegistry::new(config, storage)?;

    let run_id = registry.start_crawl(CrawlRequest {
        source,
        query,
        max_links: cli.max_links,
        cursor_start: cli.cursor,
        loop_count: cli.loops,
    })?;

    let report = tokio::select! {
        report = registry.wait(&run_id) => report?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping run {}", run_id);
            registry.stop(&run_id)?;
            registry.wait(&run_id).await?
        }
    };

    print_run_report(&report);

    match report.state {
        RunState::Completed | RunState::Stopped => Ok(()),
        state => bail!(
            "run {} ended in state {:?}: {}",
            report.run_id,
            state,
            report.last_error.as_deref().unwrap_or("unknown error")
        ),
    }
}
