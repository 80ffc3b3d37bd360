//! Catalog fixtures and test configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use bundle_mirror::{Config, HttpConfig, RetryConfig};
use serde_json::{Value, json};

/// One downloadable file inside an order
#[derive(Clone, Debug)]
pub struct FileFixture {
    /// Product display name
    pub product: String,
    /// Platform string as the API reports it
    pub platform: String,
    /// File name at the end of the download URL
    pub file_name: String,
    /// Bytes served
    pub content: Vec<u8>,
}

impl FileFixture {
    pub fn new(product: &str, platform: &str, file_name: &str, content: &[u8]) -> Self {
        Self {
            product: product.to_string(),
            platform: platform.to_string(),
            file_name: file_name.to_string(),
            content: content.to_vec(),
        }
    }

    pub fn md5(&self) -> String {
        format!("{:x}", md5::compute(&self.content))
    }

    pub fn url_path(&self, order_key: &str) -> String {
        format!("/dl/{order_key}/{}", self.file_name)
    }
}

/// One purchase order
#[derive(Clone, Debug)]
pub struct OrderFixture {
    pub key: String,
    pub name: String,
    /// Upstream timestamp, e.g. `2020-05-01T10:00:00.000000`
    pub created: String,
    pub files: Vec<FileFixture>,
}

impl OrderFixture {
    pub fn new(key: &str, name: &str, created: &str, files: Vec<FileFixture>) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            created: created.to_string(),
            files,
        }
    }

    /// Order payload as the catalog API returns it
    pub fn payload(&self, base_url: &str) -> Value {
        let subproducts: Vec<Value> = self
            .files
            .iter()
            .map(|file| {
                json!({
                    "human_name": file.product,
                    "downloads": [{
                        "machine_name": format!("{}_{}", file.file_name, file.platform),
                        "platform": file.platform,
                        "download_struct": [{
                            "name": "Download",
                            "md5": file.md5(),
                            "file_size": file.content.len(),
                            "url": {
                                "web": format!(
                                    "{base_url}{}?gamekey={}&ttl=1700000000",
                                    file.url_path(&self.key),
                                    self.key
                                ),
                                "bittorrent": null
                            }
                        }]
                    }]
                })
            })
            .collect();

        json!({
            "gamekey": self.key,
            "product": { "human_name": self.name },
            "created": self.created,
            "subproducts": subproducts
        })
    }
}

/// Configuration pointing at a mock catalog and a scratch directory
pub fn test_config(api_base_url: &str, root: &Path) -> Config {
    Config {
        session_cookie: "test-session".to_string(),
        api_base_url: api_base_url.to_string(),
        download_dir: root.join("downloads"),
        state_dir: root.join("state"),
        orphan_dir: Some(root.join("orphans")),
        download_limit: 3,
        http: HttpConfig {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(5),
            user_agent: None,
        },
        retry: RetryConfig {
            max_attempts: 1,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        ..Config::default()
    }
}

/// Expected on-disk location of a file under a mirror root
pub fn mirrored_path(root: &Path, platform: &str, order_dir: &str, item_dir: &str, file: &str) -> PathBuf {
    root.join(platform).join(order_dir).join(item_dir).join(file)
}

/// MD5 strings stored in one record file
pub fn recorded_md5s(state_dir: &Path, file_name: &str) -> Vec<String> {
    let text = std::fs::read_to_string(state_dir.join(file_name)).unwrap_or_else(|e| {
        panic!("failed to read {file_name}: {e}");
    });
    let records: Vec<Value> = serde_json::from_str(&text).unwrap_or_else(|e| {
        panic!("{file_name} is not valid JSON: {e}");
    });
    let mut md5s: Vec<String> = records
        .iter()
        .filter_map(|r| r["md5"].as_str().map(str::to_string))
        .collect();
    md5s.sort();
    md5s
}
