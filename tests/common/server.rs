//! Mock catalog API and file host built on wiremock

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::fixtures::OrderFixture;

/// A mock server acting as both the catalog API and the file host
pub struct CatalogServer {
    pub server: MockServer,
}

impl CatalogServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Serve the order list, every order payload and every file
    pub async fn publish(&self, orders: &[OrderFixture]) {
        let base_url = self.uri();
        let list: Vec<_> = orders.iter().map(|o| json!({ "gamekey": o.key })).collect();
        Mock::given(method("GET"))
            .and(path("/api/v1/user/order"))
            .respond_with(ResponseTemplate::new(200).set_body_json(list))
            .mount(&self.server)
            .await;

        for order in orders {
            Mock::given(method("GET"))
                .and(path(format!("/api/v1/order/{}", order.key)))
                .respond_with(ResponseTemplate::new(200).set_body_json(order.payload(&base_url)))
                .mount(&self.server)
                .await;

            for file in &order.files {
                Mock::given(method("GET"))
                    .and(path(file.url_path(&order.key)))
                    .respond_with(ResponseTemplate::new(200).set_body_bytes(file.content.clone()))
                    .mount(&self.server)
                    .await;
            }
        }
    }

    /// Replace everything served with `orders`
    pub async fn republish(&self, orders: &[OrderFixture]) {
        self.server.reset().await;
        self.publish(orders).await;
    }

    /// Number of file transfers requested so far
    pub async fn file_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path().starts_with("/dl/"))
            .count()
    }
}
