//! HTTP implementation of [`CatalogClient`] for the purchase library API.

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, ACCEPT_CHARSET, COOKIE, HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;

use super::CatalogClient;
use super::model::{RawOrder, RawOrderSummary};
use crate::config::Config;
use crate::error::{CatalogError, Error, Result};
use crate::types::OrderId;

/// Cookie carrying the logged-in session
const SESSION_COOKIE_NAME: &str = "_simpleauth_sess";

/// User agent the API expects from its mobile client
const DEFAULT_USER_AGENT: &str = "Apache-HttpClient/UNAVAILABLE (java 1.4)";

const ORDER_LIST_PATH: &str = "/api/v1/user/order";
const ORDER_PATH: &str = "/api/v1/order/";

/// Catalog client talking to the purchase library JSON API
#[derive(Clone)]
pub struct HttpCatalogClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpCatalogClient {
    /// Build a client from the run configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the session cookie cannot be sent as a header,
    /// or [`Error::Network`] if the TLS backend fails to initialize.
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT_CHARSET, HeaderValue::from_static("utf-8"));
        headers.insert("X-Requested-By", HeaderValue::from_static("hb_android_app"));

        let user_agent = config
            .http
            .user_agent
            .as_deref()
            .unwrap_or(DEFAULT_USER_AGENT);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|_| Error::config("http.user_agent", "not a valid header value"))?,
        );

        let mut cookie = HeaderValue::from_str(&format!(
            "{}={}",
            SESSION_COOKIE_NAME,
            config.session_cookie.trim()
        ))
        .map_err(|_| {
            Error::config(
                "session_cookie",
                "contains characters not allowed in a cookie",
            )
        })?;
        cookie.set_sensitive(true);
        headers.insert(COOKIE, cookie);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(config.http.connect_timeout)
            .timeout(config.http.request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> std::result::Result<T, CatalogError> {
        let response = self
            .http
            .get(url)
            .query(&[("ajax", "true")])
            .send()
            .await
            .map_err(|e| CatalogError::Network {
                url: url.to_string(),
                reason: e.to_string(),
                transient: e.is_timeout() || e.is_connect(),
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CatalogError::AuthRejected {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(CatalogError::Network {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
                transient: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
            });
        }

        let body = response.text().await.map_err(|e| CatalogError::Network {
            url: url.to_string(),
            reason: e.to_string(),
            transient: true,
        })?;

        serde_json::from_str(&body).map_err(|e| CatalogError::Malformed {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn list_order_ids(&self) -> std::result::Result<Vec<OrderId>, CatalogError> {
        let url = format!("{}{}", self.base_url, ORDER_LIST_PATH);
        let summaries: Vec<RawOrderSummary> = self.get_json(&url).await?;
        Ok(summaries
            .into_iter()
            .map(|summary| OrderId(summary.gamekey))
            .collect())
    }

    async fn get_order(&self, id: &OrderId) -> std::result::Result<RawOrder, CatalogError> {
        let url = format!("{}{}{}", self.base_url, ORDER_PATH, id);
        self.get_json(&url).await
    }
}
