//! Metadata phase: fetch every order with bounded parallelism.

use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;

use super::CatalogClient;
use super::model::normalize;
use crate::config::RetryConfig;
use crate::error::{CatalogError, Error, Result};
use crate::retry::with_retry;
use crate::types::{Event, Order, OrderId};

/// Result of the metadata phase
#[derive(Debug, Default)]
pub struct CollectedOrders {
    /// Orders sorted oldest first
    pub orders: Vec<Order>,
    /// Orders that could not be fetched or decoded
    pub skipped: Vec<(OrderId, CatalogError)>,
}

/// Fetch and normalize every order in `ids`, at most `concurrency` at a time.
///
/// Malformed payloads and network failures skip the affected order. An
/// authentication rejection aborts the whole phase with [`Error::Auth`].
pub async fn collect_orders(
    client: &dyn CatalogClient,
    ids: Vec<OrderId>,
    concurrency: usize,
    retry: &RetryConfig,
    event_tx: &broadcast::Sender<Event>,
) -> Result<CollectedOrders> {
    let total = ids.len();
    let mut collected = CollectedOrders::default();

    let mut results = stream::iter(ids)
        .map(move |id| async move {
            let result = with_retry(retry, || client.get_order(&id)).await;
            (id, result)
        })
        .buffer_unordered(concurrency.max(1));

    let mut done = 0;
    while let Some((id, result)) = results.next().await {
        done += 1;
        match result {
            Ok(raw) => {
                let order = normalize(id, raw);
                tracing::debug!(order = %order.id, items = order.items.len(), "Fetched order");
                collected.orders.push(order);
            }
            Err(CatalogError::AuthRejected { url, status }) => {
                return Err(Error::Auth(format!("HTTP {status} from {url}")));
            }
            Err(e) => {
                tracing::warn!(order = %id, error = %e, "Problem getting order info, skipping");
                event_tx
                    .send(Event::OrderSkipped {
                        id: id.clone(),
                        error: e.to_string(),
                    })
                    .ok();
                collected.skipped.push((id, e));
            }
        }
        event_tx.send(Event::OrderFetched { done, total }).ok();
    }

    // Completion order is arbitrary; the purchase window needs oldest first
    collected.orders.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
    Ok(collected)
}
