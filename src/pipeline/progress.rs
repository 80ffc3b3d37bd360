//! Background progress reporting for the transfer phase.

use crate::types::Event;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Interval between progress update emissions
const PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_millis(500);

/// Shared byte counters, written by transfer workers and read by the reporter.
///
/// Both counters only grow. Bytes from an attempt that is thrown away stay in
/// `fetched_bytes` and are added to `total_bytes` as well, since they will be
/// transferred again.
#[derive(Clone, Default)]
pub(crate) struct ProgressCounters {
    /// Bytes in the to-fetch set
    pub total_bytes: Arc<AtomicU64>,
    /// Bytes received or found already present
    pub fetched_bytes: Arc<AtomicU64>,
}

impl ProgressCounters {
    pub(crate) fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes: Arc::new(AtomicU64::new(total_bytes)),
            fetched_bytes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn add(&self, bytes: u64) {
        self.fetched_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Account for bytes of an attempt that did not produce a usable file
    pub(crate) fn discard(&self, bytes: u64) {
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Event {
        Event::Progress {
            fetched_bytes: self.fetched_bytes.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Spawn a background task that periodically reports byte progress.
///
/// Runs until `stop` is cancelled, then emits one last snapshot.
pub(crate) fn spawn_progress_reporter(
    counters: ProgressCounters,
    event_tx: tokio::sync::broadcast::Sender<Event>,
    stop: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROGRESS_UPDATE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    event_tx.send(counters.snapshot()).ok();
                }
                _ = stop.cancelled() => {
                    break;
                }
            }
        }

        event_tx.send(counters.snapshot()).ok();
    })
}
