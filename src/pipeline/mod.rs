//! Download pipeline: bring every item of the to-fetch set onto disk, verified.
//!
//! Split into focused submodules:
//! - [`verify`] - Content hashing of local files
//! - `transfer` - Streamed fetch into a `.part` file with an integrity gate
//! - `progress` - Shared byte counters and the periodic progress reporter
//!
//! Each item runs the state machine
//! `Pending -> VerifyingLocal -> (Satisfied | Fetching) -> VerifyingDownload -> (Satisfied | Failed)`.
//! Failures stay local to their item.

mod progress;
mod transfer;
pub mod verify;


use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, HttpConfig, RetryConfig};
use crate::error::{ItemError, Result};
use crate::retry::with_retry;
use crate::types::{Event, Item, ItemState};
use crate::utils::item_relative_path;

use progress::{ProgressCounters, spawn_progress_reporter};
use transfer::{Transfer, part_path};

/// An item that did not make it this run, with the reason
#[derive(Debug)]
pub struct ItemFailure {
    /// The item
    pub item: Item,
    /// What went wrong
    pub error: ItemError,
}

/// Result of a pipeline run
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    /// Items now present and verified on disk, with `verified` set
    pub fetched: HashSet<Item>,
    /// Items that failed, reported once at the end
    pub failures: Vec<ItemFailure>,
    /// Whether the run was interrupted before every item settled
    pub cancelled: bool,
}

/// Everything a pipeline run needs, built once per run
pub struct PipelineContext {
    /// Mirror root
    pub root: PathBuf,
    /// Maximum transfers in flight
    pub concurrency: usize,
    /// Fetch smallest items first instead of largest first
    pub smallest_first: bool,
    /// Maximum gap between two chunks of a transfer
    pub idle_timeout: Duration,
    /// Retry policy for transient transfer errors
    pub retry: RetryConfig,
    /// HTTP client used for file transfers
    pub http: reqwest::Client,
    /// Event broadcast sender
    pub event_tx: broadcast::Sender<Event>,
    /// Stops the run
    pub cancel: CancellationToken,
}

impl PipelineContext {
    /// Build a context from the run configuration
    pub fn new(
        config: &Config,
        event_tx: broadcast::Sender<Event>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        Ok(Self {
            root: config.download_dir.clone(),
            concurrency: config.download_limit,
            smallest_first: config.smallest_first,
            idle_timeout: config.http.idle_timeout,
            retry: config.retry.clone(),
            http: build_transfer_client(&config.http)?,
            event_tx,
            cancel,
        })
    }

    /// Where `item` lives under the mirror root
    pub fn target_path(&self, item: &Item) -> PathBuf {
        self.root.join(item_relative_path(item))
    }
}

/// HTTP client for file transfers.
///
/// No whole-request timeout: large files are bounded by the idle timeout
/// between chunks instead.
pub fn build_transfer_client(http: &HttpConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().connect_timeout(http.connect_timeout);
    if let Some(user_agent) = &http.user_agent {
        builder = builder.user_agent(user_agent.clone());
    }
    Ok(builder.build()?)
}

/// How an item reached `Satisfied`
enum Settled {
    /// A matching file was already on disk
    AlreadyPresent(PathBuf),
    /// The file was transferred and verified
    Transferred(PathBuf),
}

/// Tracks one item through its states
struct ItemRun<'a> {
    item: &'a Item,
    state: ItemState,
}

impl<'a> ItemRun<'a> {
    fn new(item: &'a Item) -> Self {
        Self {
            item,
            state: ItemState::Pending,
        }
    }

    fn enter(&mut self, next: ItemState) {
        tracing::trace!(item = %self.item.name, from = ?self.state, to = ?next, "Item state change");
        self.state = next;
    }
}

/// Run the pipeline over `to_fetch`.
///
/// Never fails as a whole: every per-item problem lands in
/// [`PipelineOutcome::failures`].
pub async fn run(ctx: &PipelineContext, to_fetch: HashSet<Item>) -> PipelineOutcome {
    let mut items: Vec<Item> = to_fetch.into_iter().collect();
    if ctx.smallest_first {
        items.sort_by(|a, b| a.size().cmp(&b.size()).then_with(|| a.key().cmp(b.key())));
    } else {
        items.sort_by(|a, b| b.size().cmp(&a.size()).then_with(|| a.key().cmp(b.key())));
    }

    let total_bytes: u64 = items.iter().map(Item::size).sum();
    tracing::info!(items = items.len(), total_bytes, "Starting transfers");

    let counters = ProgressCounters::new(total_bytes);
    let reporter_stop = CancellationToken::new();
    let reporter = spawn_progress_reporter(
        counters.clone(),
        ctx.event_tx.clone(),
        reporter_stop.clone(),
    );

    let mut outcome = PipelineOutcome::default();
    {
        let counters = &counters;
        let mut results = stream::iter(items)
            .map(move |item| async move {
                let result = process_item(ctx, &item, counters).await;
                (item, result)
            })
            .buffer_unordered(ctx.concurrency.max(1));

        while let Some((mut item, result)) = results.next().await {
            match result {
                Ok(settled) => {
                    let event = match settled {
                        Settled::AlreadyPresent(path) => {
                            tracing::info!(item = %item.name, path = %path.display(), "Already present");
                            Event::ItemSatisfied {
                                name: item.name.clone(),
                                path,
                            }
                        }
                        Settled::Transferred(path) => {
                            tracing::info!(item = %item.name, path = %path.display(), "Fetched");
                            Event::ItemFetched {
                                name: item.name.clone(),
                                path,
                                size: item.size(),
                            }
                        }
                    };
                    ctx.event_tx.send(event).ok();
                    item.verified = true;
                    outcome.fetched.insert(item);
                }
                Err(ItemError::Cancelled) => {
                    tracing::debug!(item = %item.name, "Skipped, run cancelled");
                }
                Err(error) => {
                    tracing::warn!(item = %item.name, url = %item.url, error = %error, "Failed to fetch item");
                    ctx.event_tx
                        .send(Event::ItemFailed {
                            name: item.name.clone(),
                            error: error.to_string(),
                        })
                        .ok();
                    outcome.failures.push(ItemFailure { item, error });
                }
            }
        }
    }

    reporter_stop.cancel();
    if let Err(e) = reporter.await {
        tracing::debug!(error = %e, "Progress reporter ended abnormally");
    }

    outcome.cancelled = ctx.cancel.is_cancelled();
    outcome
}

async fn process_item(
    ctx: &PipelineContext,
    item: &Item,
    counters: &ProgressCounters,
) -> std::result::Result<Settled, ItemError> {
    let mut run = ItemRun::new(item);
    if ctx.cancel.is_cancelled() {
        return Err(ItemError::Cancelled);
    }

    let target = ctx.target_path(item);
    let result = settle(ctx, &mut run, &target, counters).await;
    if result.is_err() {
        run.enter(ItemState::Failed);
    }
    result
}

async fn settle(
    ctx: &PipelineContext,
    run: &mut ItemRun<'_>,
    target: &Path,
    counters: &ProgressCounters,
) -> std::result::Result<Settled, ItemError> {
    let item = run.item;

    run.enter(ItemState::VerifyingLocal);
    if check_local(target, item).await? {
        counters.add(item.size());
        run.enter(ItemState::Satisfied);
        return Ok(Settled::AlreadyPresent(target.to_path_buf()));
    }

    run.enter(ItemState::Fetching);
    let part = part_path(target);
    let attempt = Transfer {
        http: &ctx.http,
        item,
        part: &part,
        idle_timeout: ctx.idle_timeout,
        cancel: &ctx.cancel,
        counters,
    };
    let streamed_md5 = with_retry(&ctx.retry, || transfer::fetch(&attempt)).await?;

    run.enter(ItemState::VerifyingDownload);
    if let Err(e) = verify_download(&part, item, &streamed_md5).await {
        counters.discard(item.size());
        remove_quietly(&part).await;
        return Err(e);
    }

    promote(&part, target).await?;
    run.enter(ItemState::Satisfied);
    Ok(Settled::Transferred(target.to_path_buf()))
}

/// `Ok(true)` if a matching file is already at `target`. A file with the
/// wrong contents is deleted.
async fn check_local(target: &Path, item: &Item) -> std::result::Result<bool, ItemError> {
    match tokio::fs::try_exists(target).await {
        Ok(false) => return Ok(false),
        Ok(true) => {}
        Err(e) => return Err(ItemError::fs(target, e)),
    }

    if verify::file_matches(target, item)
        .await
        .map_err(|e| ItemError::fs(target, e))?
    {
        return Ok(true);
    }

    tracing::warn!(path = %target.display(), "Local file does not match, deleting");
    tokio::fs::remove_file(target)
        .await
        .map_err(|e| ItemError::fs(target, e))?;
    Ok(false)
}

async fn verify_download(
    part: &Path,
    item: &Item,
    streamed_md5: &str,
) -> std::result::Result<(), ItemError> {
    if streamed_md5 != item.md5() {
        return Err(ItemError::ChecksumMismatch {
            expected: item.md5().to_string(),
            actual: streamed_md5.to_string(),
        });
    }

    // Re-read from disk to catch anything lost between the stream and the file
    let on_disk = verify::file_md5(part)
        .await
        .map_err(|e| ItemError::fs(part, e))?;
    if on_disk != item.md5() {
        return Err(ItemError::ChecksumMismatch {
            expected: item.md5().to_string(),
            actual: on_disk,
        });
    }
    Ok(())
}

/// Move a verified `.part` file onto its target. The `.part` file is removed
/// if the move fails.
async fn promote(part: &Path, target: &Path) -> std::result::Result<(), ItemError> {
    if let Err(e) = tokio::fs::rename(part, target).await {
        remove_quietly(part).await;
        return Err(ItemError::fs(target, e));
    }
    Ok(())
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove file");
    }
}
