//! Command-line entry point for bundle-mirror.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bundle_mirror::utils::human_size;
use bundle_mirror::{
    Config, Event, Mirror, PlatformSelector, RunSummary, SyncRequest, cancel_on_signal,
};

/// Mirror a purchase library onto the local filesystem
#[derive(Debug, Parser)]
#[command(name = "bundle-mirror", version, about)]
struct Cli {
    /// Platforms to mirror: android, audio, ebook, linux, mac, windows, other,
    /// all (every observed platform) or nogames (all but game builds)
    #[arg(value_name = "PLATFORM", required = true, num_args = 1..)]
    platforms: Vec<PlatformSelector>,

    /// Download X files in parallel
    #[arg(short = 'l', long, value_name = "X")]
    download_limit: Option<usize>,

    /// Download only from the Y newest purchases, 0 for all
    #[arg(short = 'n', long, value_name = "Y")]
    purchase_limit: Option<usize>,

    /// Download smallest files first
    #[arg(short = 's', long)]
    smallest_first: bool,

    /// Configuration file, created with defaults if missing
    #[arg(short = 'c', long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,
}

impl Cli {
    /// Command-line flags take precedence over the configuration file
    fn apply(&self, config: &mut Config) {
        if let Some(limit) = self.download_limit {
            config.download_limit = limit;
        }
        if let Some(limit) = self.purchase_limit {
            config.purchase_limit = limit;
        }
        if self.smallest_first {
            config.smallest_first = true;
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load_or_create(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    cli.apply(&mut config);

    let mirror = Mirror::new(config).context("Invalid configuration")?;
    info!(
        download_dir = %mirror.config().download_dir.display(),
        state_dir = %mirror.config().state_dir.display(),
        download_limit = mirror.config().download_limit,
        purchase_limit = mirror.config().purchase_limit,
        "Starting mirror run"
    );

    let events = mirror.subscribe();
    let reporter = tokio::spawn(log_events(events));

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let request = SyncRequest {
        selectors: cli.platforms.clone(),
    };
    let result = mirror.run(&request, cancel).await;

    drop(mirror);
    reporter.await.ok();

    let summary = result.context("Mirror run failed")?;
    report(&summary);
    Ok(())
}

async fn log_events(mut events: tokio::sync::broadcast::Receiver<Event>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match events.recv().await {
            Ok(Event::OrderFetched { done, total }) if done == total || done % 25 == 0 => {
                info!("Fetched order info {done}/{total}");
            }
            Ok(Event::Progress {
                fetched_bytes,
                total_bytes,
            }) if total_bytes > 0 => {
                tracing::debug!(
                    "Progress {} / {}",
                    human_size(fetched_bytes),
                    human_size(total_bytes)
                );
            }
            Ok(Event::ItemFetched { name, size, .. }) => {
                info!("Downloaded {name} ({})", human_size(size));
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event reporter lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn report(summary: &RunSummary) {
    info!(
        orders = summary.orders,
        skipped_orders = summary.skipped_orders,
        already_recorded = summary.already_recorded,
        fetched = summary.fetched,
        failed = summary.failures.len(),
        orphaned = summary.orphaned,
        relocated = summary.relocated,
        not_downloaded = summary.unfetched,
        "Run complete"
    );

    for failure in &summary.failures {
        warn!(
            item = %failure.item.name,
            url = %failure.item.url,
            error = %failure.error,
            "Not downloaded"
        );
    }

    if summary.cancelled {
        warn!("Run was interrupted, remaining items will be picked up next time");
    }
}
