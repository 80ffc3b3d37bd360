//! Remote catalog access and normalization.
//!
//! - [`client`] - HTTP client for the purchase library API
//! - [`model`] - Raw payload schema and normalization into [`Order`](crate::types::Order)
//! - [`collect`] - Parallel metadata phase producing the time-ordered order list

pub mod client;
pub mod collect;
pub mod model;

pub use client::HttpCatalogClient;
pub use collect::{CollectedOrders, collect_orders};
pub use model::{RawOrder, normalize};

use crate::error::CatalogError;
use crate::types::OrderId;

/// Abstraction over the remote catalog, enabling testability.
#[async_trait::async_trait]
pub trait CatalogClient: Send + Sync {
    /// List every purchase order identifier visible to the session
    async fn list_order_ids(&self) -> Result<Vec<OrderId>, CatalogError>;

    /// Fetch the raw product listing of one order
    async fn get_order(&self, id: &OrderId) -> Result<RawOrder, CatalogError>;
}
