//! # bundle-mirror
//!
//! Incremental mirror of a purchase library onto the local filesystem.
//!
//! A run lists every purchase order, works out which files are missing
//! locally, downloads them in parallel with content verification, moves files
//! that vanished from the catalog out of the way, and records the result so
//! the next run only does the difference.
//!
//! ## Design Philosophy
//!
//! - **Identity is content** - an item is its MD5 plus byte size; names and
//!   URLs are metadata
//! - **Nothing unverified is trusted** - a file only lands under its final
//!   name after size and hash checks pass
//! - **Failures stay local** - one bad order or file never stops the run
//! - **Event-driven** - consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use bundle_mirror::{Config, Mirror, SyncRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         session_cookie: "value of _simpleauth_sess".to_string(),
//!         ..Default::default()
//!     };
//!
//!     let mirror = Mirror::new(config)?;
//!
//!     // Subscribe to events
//!     let mut events = mirror.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = mirror
//!         .run(&SyncRequest::default(), CancellationToken::new())
//!         .await?;
//!     println!("fetched {} items", summary.fetched);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Remote catalog client and normalization
pub mod catalog;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Concurrent download-and-verify pipeline
pub mod pipeline;
/// Catalog versus record reconciliation
pub mod reconcile;
/// Retry logic with exponential backoff
pub mod retry;
/// Persisted record and orphan relocation
pub mod state;
/// End-to-end mirror run
pub mod sync;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use catalog::{CatalogClient, HttpCatalogClient};
pub use config::{Config, HttpConfig, RetryConfig};
pub use error::{CatalogError, Error, ItemError, Result};
pub use reconcile::{Reconciliation, reconcile};
pub use state::{StateSnapshot, StateStore};
pub use sync::{Mirror, RunSummary, SyncRequest};
pub use types::{Event, Item, ItemKey, Order, OrderId, Platform, PlatformSelector};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process receives a termination signal.
///
/// On Unix that is SIGINT or SIGTERM, elsewhere Ctrl+C.
///
/// In-flight transfers stop and the record is still written with what was
/// verified before the signal.
///
/// # Example
///
/// ```no_run
/// use bundle_mirror::{Config, Mirror, SyncRequest, cancel_on_signal};
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mirror = Mirror::new(Config::default())?;
///     let cancel = CancellationToken::new();
///     tokio::spawn(cancel_on_signal(cancel.clone()));
///
///     mirror.run(&SyncRequest::default(), cancel).await?;
///     Ok(())
/// }
/// ```
pub async fn cancel_on_signal(token: CancellationToken) {
    wait_for_signal().await;
    token.cancel();
}

/// Resolve on SIGINT or SIGTERM. Falls back to Ctrl+C alone when either
/// handler cannot be installed (some containers and test harnesses).
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
        (Ok(mut interrupt), Ok(mut terminate)) => {
            let name = tokio::select! {
                _ = interrupt.recv() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
            };
            tracing::info!(signal = name, "Stopping run");
        }
        (interrupt, terminate) => {
            for e in [interrupt.err(), terminate.err()].into_iter().flatten() {
                tracing::warn!(error = %e, "Could not install signal handler, using Ctrl+C only");
            }
            wait_for_ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!(signal = "Ctrl+C", "Stopping run"),
        Err(e) => tracing::error!(error = %e, "Could not listen for Ctrl+C"),
    }
}
