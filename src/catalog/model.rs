//! Raw order payloads and their normalization into [`Order`]s.
//!
//! The raw structs mirror the catalog API: order-level fields are required,
//! everything below a sub-product is optional and checked entry by entry.

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;

use crate::types::{Item, NewItem, Order, OrderId, Platform};

/// Download identifiers known to ship without a usable file upstream
pub const EXCLUDED_MACHINE_NAMES: &[&str] = &[
    "thespookening_android",
    "worldofgoo_android_pc_soundtrack_audio",
    "dustforce_asm",
];

/// Hashes of upstream entries whose metadata does not match the served file
pub const EXCLUDED_MD5: &[&str] = &[
    "c0776421f3527a706cf1f3f3765cafb4",
    "2f8612361dde58c73525ea0d024c0460",
    "bcb063559d17364e9f7bfd3d4fd799ee",
    "428dd67152164f444e6fa21e87caa147",
    "748b36888d3c6e747dc00eea5d518bb9",
    "ef8a5895edce744719bc031ffb0173b0",
    "b5796f487f5f647045bb5fb6eaf16edf",
];

/// Timestamp format of the `created` field
const CREATED_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// One entry of the order list endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct RawOrderSummary {
    /// Order identifier
    pub gamekey: String,
}

/// Full order payload
#[derive(Debug, Clone, Deserialize)]
pub struct RawOrder {
    /// Order-level product
    pub product: RawProduct,
    /// Purchase timestamp
    #[serde(deserialize_with = "deserialize_created")]
    pub created: NaiveDateTime,
    /// Products contained in the order
    #[serde(default)]
    pub subproducts: Option<Vec<RawSubproduct>>,
}

/// Order-level product
#[derive(Debug, Clone, Deserialize)]
pub struct RawProduct {
    /// Display name of the order
    pub human_name: String,
}

/// One product inside an order
#[derive(Debug, Clone, Deserialize)]
pub struct RawSubproduct {
    /// Display name
    #[serde(default)]
    pub human_name: Option<String>,
    /// Per-platform downloads
    #[serde(default)]
    pub downloads: Option<Vec<RawDownload>>,
}

/// One platform's downloads for a product
#[derive(Debug, Clone, Deserialize)]
pub struct RawDownload {
    /// Machine-readable identifier
    #[serde(default)]
    pub machine_name: Option<String>,
    /// Platform string
    #[serde(default)]
    pub platform: Option<String>,
    /// File entries, decoded one at a time
    #[serde(default)]
    pub download_struct: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    #[serde(default)]
    url: Option<RawUrl>,
    #[serde(default)]
    file_size: Option<u64>,
    #[serde(default)]
    md5: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUrl {
    #[serde(default)]
    web: Option<String>,
}

fn deserialize_created<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_created(&raw).map_err(serde::de::Error::custom)
}

/// Parse an order timestamp such as `2020-01-01T12:30:00.123456`
pub fn parse_created(raw: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(raw.trim(), CREATED_FORMAT)
}

/// Normalize a raw order into an [`Order`].
///
/// Never fails: entries with missing fields are dropped (with a warning unless
/// they are on the exclusion list) and the rest of the order is kept.
pub fn normalize(id: OrderId, raw: RawOrder) -> Order {
    let bundle_name = raw.product.human_name;
    let date = raw.created;
    let mut seen = HashSet::new();
    let mut items = Vec::new();

    for subproduct in raw.subproducts.unwrap_or_default() {
        let Some(name) = subproduct.human_name else {
            continue;
        };
        for download in subproduct.downloads.unwrap_or_default() {
            let machine_name = download.machine_name.unwrap_or_default();
            let platform = Platform::from_tag(download.platform.as_deref().unwrap_or_default());

            for entry in download.download_struct.unwrap_or_default() {
                let Some(file) = decode_file(&id, &machine_name, entry) else {
                    continue;
                };
                if EXCLUDED_MD5.contains(&file.md5.as_str()) {
                    tracing::debug!(order = %id, machine_name = %machine_name, md5 = %file.md5, "Skipping excluded entry");
                    continue;
                }

                let item: Item = NewItem {
                    md5: file.md5,
                    size: file.size,
                    name: name.clone(),
                    machine_name: machine_name.clone(),
                    platform,
                    url: file.url,
                    bundle_name: bundle_name.clone(),
                    date,
                }
                .into();

                if seen.insert(item.key().clone()) {
                    items.push(item);
                } else {
                    tracing::debug!(order = %id, key = %item.key(), "Duplicate entry in order");
                }
            }
        }
    }

    Order {
        id,
        name: bundle_name,
        date,
        items,
    }
}

struct FileFields {
    url: String,
    size: u64,
    md5: String,
}

fn decode_file(id: &OrderId, machine_name: &str, entry: serde_json::Value) -> Option<FileFields> {
    let fields = serde_json::from_value::<RawFile>(entry)
        .ok()
        .and_then(|file| {
            Some(FileFields {
                url: file.url?.web?,
                size: file.file_size?,
                md5: file.md5?,
            })
        });

    if fields.is_none() {
        if EXCLUDED_MACHINE_NAMES.contains(&machine_name) {
            tracing::debug!(order = %id, machine_name, "Skipping known-incomplete entry");
        } else {
            tracing::warn!(order = %id, machine_name, "Problem with parsing entry, skipping");
        }
    }
    fields
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawOrder {
        serde_json::from_value(value).unwrap()
    }

    fn file(md5: &str, size: u64, url: &str) -> serde_json::Value {
        json!({ "md5": md5, "file_size": size, "url": { "web": url, "bittorrent": null } })
    }

    #[test]
    fn parses_created_with_and_without_fraction() {
        let a = parse_created("2020-01-01T10:00:00.123456").unwrap();
        let b = parse_created("2020-01-01T10:00:00").unwrap();
        assert_eq!(a.date(), b.date());
        assert!(parse_created("01/01/2020").is_err());
    }

    #[test]
    fn normalizes_all_valid_entries() {
        let order = normalize(
            "key1".into(),
            raw(json!({
                "product": { "human_name": "Humble Book Bundle" },
                "created": "2021-06-01T08:00:00.000000",
                "subproducts": [
                    {
                        "human_name": "Book One",
                        "downloads": [{
                            "machine_name": "bookone_ebook",
                            "platform": "ebook",
                            "download_struct": [
                                file("aaa", 10, "https://dl.example.com/one.pdf?t=1"),
                                file("bbb", 20, "https://dl.example.com/one.epub?t=1")
                            ]
                        }]
                    },
                    {
                        "human_name": "Game",
                        "downloads": [{
                            "machine_name": "game_video",
                            "platform": "video",
                            "download_struct": [file("ccc", 30, "https://dl.example.com/g.mp4")]
                        }]
                    }
                ]
            })),
        );

        assert_eq!(order.name, "Humble Book Bundle");
        assert_eq!(order.items.len(), 3);
        assert_eq!(order.items[0].name, "Book One");
        assert_eq!(order.items[0].platform, Platform::Ebook);
        assert_eq!(order.items[1].md5(), "bbb");
        assert_eq!(order.items[2].platform, Platform::Other);
        assert!(order.items.iter().all(|i| i.bundle_name == "Humble Book Bundle"));
        assert!(order.items.iter().all(|i| !i.verified));
    }

    #[test]
    fn malformed_entries_do_not_abort_the_order() {
        let order = normalize(
            "key2".into(),
            raw(json!({
                "product": { "human_name": "Mixed" },
                "created": "2019-03-04T05:06:07",
                "subproducts": [
                    { "downloads": [] },
                    {
                        "human_name": "Soundtrack",
                        "downloads": [{
                            "machine_name": "worldofgoo_android_pc_soundtrack_audio",
                            "platform": "audio",
                            "download_struct": [
                                { "name": "streaming only" },
                                { "md5": 17, "file_size": "big" },
                                file("ddd", 40, "https://dl.example.com/ost.zip")
                            ]
                        }]
                    }
                ]
            })),
        );

        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].md5(), "ddd");
    }

    #[test]
    fn excluded_hashes_are_dropped() {
        let order = normalize(
            "key3".into(),
            raw(json!({
                "product": { "human_name": "SOMA" },
                "created": "2018-01-01T00:00:00",
                "subproducts": [{
                    "human_name": "SOMA",
                    "downloads": [{
                        "machine_name": "soma_mac",
                        "platform": "mac",
                        "download_struct": [
                            file("b5796f487f5f647045bb5fb6eaf16edf", 50, "https://dl.example.com/soma.dmg"),
                            file("eee", 60, "https://dl.example.com/soma2.dmg")
                        ]
                    }]
                }]
            })),
        );

        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].md5(), "eee");
    }

    #[test]
    fn duplicate_entries_within_an_order_keep_first() {
        let order = normalize(
            "key4".into(),
            raw(json!({
                "product": { "human_name": "Dupes" },
                "created": "2018-01-01T00:00:00",
                "subproducts": [
                    {
                        "human_name": "First Listing",
                        "downloads": [{ "machine_name": "a", "platform": "linux",
                            "download_struct": [file("fff", 70, "https://dl.example.com/a.tgz")] }]
                    },
                    {
                        "human_name": "Second Listing",
                        "downloads": [{ "machine_name": "b", "platform": "linux",
                            "download_struct": [file("FFF", 70, "https://dl.example.com/b.tgz")] }]
                    }
                ]
            })),
        );

        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].name, "First Listing");
    }

    #[test]
    fn order_without_subproducts_is_empty() {
        let order = normalize(
            "key5".into(),
            raw(json!({
                "product": { "human_name": "Empty" },
                "created": "2018-01-01T00:00:00",
                "subproducts": null
            })),
        );
        assert!(order.items.is_empty());
    }

    #[test]
    fn missing_order_fields_fail_to_decode() {
        let result = serde_json::from_value::<RawOrder>(json!({
            "created": "2018-01-01T00:00:00",
            "subproducts": []
        }));
        assert!(result.is_err());

        let result = serde_json::from_value::<RawOrder>(json!({
            "product": { "human_name": "Bad Date" },
            "created": "yesterday"
        }));
        assert!(result.is_err());
    }
}
