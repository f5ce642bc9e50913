//! CLI entry point for the geofetch tool.

use std::io::{self, IsTerminal, Read};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use geofetch::{
    Descriptor, DownloadEngine, EngineConfig, ManifestStore, ProgressTracker, RangeFetcher,
    RetryPolicy, human_readable_size,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    // Read the listing: from the file argument or stdin
    let listing_text = if let Some(path) = &args.listing {
        std::fs::read_to_string(path)
            .with_context(|| format!("cannot read listing file {}", path.display()))?
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        info!("No listing provided. Pipe a JSON listing via stdin or pass a file path.");
        info!("Example: geofetch listing.json -o ./downloads");
        return Ok(());
    };

    let descriptors: Vec<Descriptor> =
        serde_json::from_str(&listing_text).context("listing is not a valid JSON object array")?;

    if descriptors.is_empty() {
        info!("Listing contains no objects");
        return Ok(());
    }

    let total_bytes: u64 = descriptors.iter().map(Descriptor::size).sum();
    info!(
        objects = descriptors.len(),
        total_size = %human_readable_size(total_bytes),
        output_dir = %args.output_dir.display(),
        "starting download"
    );

    let config = EngineConfig {
        max_concurrent: usize::from(args.max_concurrent),
        multipart_count: u32::from(args.multipart),
        part_concurrency: usize::from(args.part_concurrency),
        quiet: args.quiet,
        output_dir: args.output_dir.clone(),
        strip_prefix: args.strip_prefix.clone(),
        ..EngineConfig::default()
    };

    let manifest = Arc::new(ManifestStore::load(&args.output_dir, args.repository.clone()).await);
    let progress = Arc::new(ProgressTracker::new());
    let retry_policy = RetryPolicy::with_max_attempts(u32::from(args.max_retries));
    let engine = DownloadEngine::new(config, retry_policy, RangeFetcher::new())?;

    // Ctrl-C cancels the whole run: in-flight fetches abort, partial
    // files stay on disk, and the manifest keeps only completed jobs.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; cancelling run");
                cancel.cancel();
            }
        });
    }

    let stats = engine.run(&descriptors, &manifest, &progress, &cancel).await?;

    info!(
        completed = stats.completed(),
        failed = stats.failed(),
        skipped = stats.skipped(),
        retried = stats.retried(),
        transferred = %human_readable_size(progress.bytes_transferred()),
        "download finished"
    );

    Ok(())
}
