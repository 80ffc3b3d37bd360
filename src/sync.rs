//! One mirror run, end to end.
//!
//! Phases, in order:
//! 1. Load the persisted record (an unreadable record aborts here)
//! 2. List orders (any failure aborts here, before side effects)
//! 3. Fetch order metadata in parallel
//! 4. Reconcile catalog against the record
//! 5. Move orphaned files out of the mirror (only after a complete listing)
//! 6. Run the download pipeline
//! 7. Save the record

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::catalog::{CatalogClient, HttpCatalogClient, collect_orders};
use crate::config::Config;
use crate::error::{CatalogError, Error, Result};
use crate::pipeline::{self, ItemFailure, PipelineContext};
use crate::reconcile::reconcile;
use crate::retry::with_retry;
use crate::state::{StateSnapshot, StateStore, relocate_orphans};
use crate::types::{Event, PlatformSelector};

/// Buffer size for the event broadcast channel
const EVENT_CHANNEL_BUFFER: usize = 1000;

/// What to mirror in one run
#[derive(Clone, Debug)]
pub struct SyncRequest {
    /// Platform selectors, unioned
    pub selectors: Vec<PlatformSelector>,
}

impl Default for SyncRequest {
    fn default() -> Self {
        Self {
            selectors: vec![PlatformSelector::All],
        }
    }
}

/// Final summary of a run
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Orders in the catalog
    pub orders: usize,
    /// Orders skipped because their metadata was unusable
    pub skipped_orders: usize,
    /// Candidates already confirmed by the record
    pub already_recorded: usize,
    /// Items brought onto disk (or found intact) this run
    pub fetched: usize,
    /// Items that failed this run
    pub failures: Vec<ItemFailure>,
    /// Items newly detected as orphaned
    pub orphaned: usize,
    /// Orphaned files moved out of the mirror
    pub relocated: usize,
    /// Catalog items still not present after the run
    pub unfetched: usize,
    /// Whether the run was interrupted
    pub cancelled: bool,
}

/// Mirror of a purchase library onto the local filesystem
pub struct Mirror {
    config: Arc<Config>,
    client: Arc<dyn CatalogClient>,
    store: StateStore,
    event_tx: broadcast::Sender<Event>,
}

impl Mirror {
    /// Create a mirror talking to the configured catalog API
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid, in
    /// particular when no session cookie is set.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let client = HttpCatalogClient::new(&config)?;
        Ok(Self::with_client(config, Arc::new(client)))
    }

    /// Create a mirror with a custom catalog client
    pub fn with_client(config: Config, client: Arc<dyn CatalogClient>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_BUFFER);
        let store = StateStore::new(config.state_dir.clone());
        Self {
            config: Arc::new(config),
            client,
            store,
            event_tx,
        }
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The configuration this mirror runs with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one full sync.
    ///
    /// Per-order and per-item problems are reported in the summary. Errors are
    /// returned only for failures that stop the run before any file is
    /// touched, or when the record cannot be written at the end.
    pub async fn run(&self, request: &SyncRequest, cancel: CancellationToken) -> Result<RunSummary> {
        let config = &self.config;

        let prior = self.store.load().await?;
        let previous_orphaned = self.store.load_orphaned().await?;
        tracing::info!(
            recorded = prior.len(),
            orphaned = previous_orphaned.len(),
            "Loaded record"
        );

        let ids = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = with_retry(&config.retry, || self.client.list_order_ids()) => {
                result.map_err(|e| match e {
                    CatalogError::AuthRejected { url, status } => {
                        Error::Auth(format!("HTTP {status} from {url}"))
                    }
                    other => Error::Catalog(other),
                })?
            }
        };
        tracing::info!(orders = ids.len(), "Listed orders");
        self.event_tx
            .send(Event::OrdersListed { count: ids.len() })
            .ok();

        let collected = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = collect_orders(
                self.client.as_ref(),
                ids,
                config.download_limit,
                &config.retry,
                &self.event_tx,
            ) => result?,
        };
        if !collected.skipped.is_empty() {
            tracing::warn!(skipped = collected.skipped.len(), "Some orders could not be read");
        }

        let mut reconciliation = reconcile(
            &collected.orders,
            &prior,
            config.purchase_limit,
            &request.selectors,
        );
        // Items of a skipped order are missing from the catalog without having
        // vanished upstream, so nothing can be confirmed orphaned this run
        if !collected.skipped.is_empty() && !reconciliation.orphaned.is_empty() {
            tracing::warn!(
                skipped_orders = collected.skipped.len(),
                held_back = reconciliation.orphaned.len(),
                "Catalog incomplete, keeping unlisted items until a full listing"
            );
            reconciliation.orphaned.clear();
        }
        tracing::info!(
            to_fetch = reconciliation.to_fetch.len(),
            already_recorded = reconciliation.satisfied.len(),
            orphaned = reconciliation.orphaned.len(),
            catalog = reconciliation.catalog.len(),
            "Reconciled catalog"
        );

        let relocation = relocate_orphans(
            &reconciliation.orphaned,
            &config.download_dir,
            &config.orphan_dir(),
            &self.event_tx,
        )
        .await;

        let ctx = PipelineContext::new(config, self.event_tx.clone(), cancel.clone())?;
        let outcome = pipeline::run(&ctx, reconciliation.to_fetch).await;

        let snapshot = StateSnapshot::compute(
            &prior,
            &previous_orphaned,
            &reconciliation.orphaned,
            &outcome.fetched,
            &reconciliation.catalog,
        );
        self.store.save(&snapshot).await?;

        Ok(RunSummary {
            orders: collected.orders.len() + collected.skipped.len(),
            skipped_orders: collected.skipped.len(),
            already_recorded: reconciliation.satisfied.len(),
            fetched: outcome.fetched.len(),
            failures: outcome.failures,
            orphaned: reconciliation.orphaned.len(),
            relocated: relocation.moved.len(),
            unfetched: snapshot.unfetched.len(),
            cancelled: outcome.cancelled,
        })
    }
}
